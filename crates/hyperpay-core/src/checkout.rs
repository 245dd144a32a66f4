//! # Checkout Types
//!
//! Checkout sessions, payment attempts and receipts.

use crate::error::{PaymentError, PaymentResult};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a checkout session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    /// Created, awaiting payment
    Pending,
    /// Waiting on the cardholder's 3-D Secure challenge
    ChallengeRequired,
    /// Payment completed successfully
    Completed,
    /// Payment failed, was declined or was cancelled
    Failed,
    /// Completed payment refunded in full
    Refunded,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Pending => "pending",
            CheckoutStatus::ChallengeRequired => "challenge_required",
            CheckoutStatus::Completed => "completed",
            CheckoutStatus::Failed => "failed",
            CheckoutStatus::Refunded => "refunded",
        }
    }

    /// `pending → {challenge_required → completed|failed} | completed | failed`,
    /// and `completed → refunded` once the full amount is refunded
    pub fn can_transition_to(&self, next: CheckoutStatus) -> bool {
        use CheckoutStatus::*;
        matches!(
            (self, next),
            (Pending, ChallengeRequired)
                | (Pending, Completed)
                | (Pending, Failed)
                | (ChallengeRequired, Completed)
                | (ChallengeRequired, Failed)
                | (Completed, Refunded)
        )
    }
}

impl Default for CheckoutStatus {
    fn default() -> Self {
        CheckoutStatus::Pending
    }
}

impl std::fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checkout session tracked for the lifetime of the merchant session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkout {
    pub checkout_id: String,

    /// Amount in minor units plus currency
    pub amount: Money,

    pub customer_email: String,

    /// Opaque 3-D Secure context supplied at creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub three_d_secure: Option<serde_json::Value>,

    #[serde(default)]
    pub status: CheckoutStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkout {
    pub fn new(checkout_id: impl Into<String>, amount: Money, customer_email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            checkout_id: checkout_id.into(),
            amount,
            customer_email: customer_email.into(),
            three_d_secure: None,
            status: CheckoutStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: attach 3-D Secure context
    pub fn with_three_d_secure(mut self, context: Option<serde_json::Value>) -> Self {
        self.three_d_secure = context;
        self
    }

    /// Move to `next`, enforcing the checkout state machine
    pub fn transition(&mut self, next: CheckoutStatus) -> PaymentResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::invalid_state(
                &self.checkout_id,
                format!("cannot move from {} to {}", self.status, next),
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Request to open a checkout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub amount: f64,
    pub currency: String,
    pub customer_email: String,
    #[serde(default, alias = "threeDSecureData")]
    pub three_d_secure: Option<serde_json::Value>,
}

impl CheckoutRequest {
    pub fn new(amount: f64, currency: impl Into<String>, customer_email: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            customer_email: customer_email.into(),
            three_d_secure: None,
        }
    }
}

/// Syntactic email check: one `@`, non-empty local part, dotted domain, no whitespace
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return false,
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

/// Artifacts returned by the issuer after a 3-D Secure challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreeDSecureResult {
    pub authentication_value: String,
    pub eci: String,
    pub cavv: String,
}

/// Parameters the host needs to present a challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeParameters {
    /// Issuer ACS redirect target
    pub acs_url: String,
    /// Pending authentication request token
    pub pa_req: String,
    /// Merchant data token echoed back by the ACS
    pub md: String,
}

/// Host's signal that the cardholder finished the challenge.
/// Missing fields are filled in by the gateway's authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeCompletion {
    #[serde(default)]
    pub authentication_value: Option<String>,
    #[serde(default)]
    pub eci: Option<String>,
    #[serde(default)]
    pub cavv: Option<String>,
}

/// What was charged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum PaymentInstrument {
    /// SHA-256 fingerprint of the card number
    CardFingerprint(String),
    /// Opaque token from `tokenize_payment_method`
    Token(String),
}

/// Outcome of a finalized attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { reason: String },
}

/// A finalized payment attempt. Recorded once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAttempt {
    pub checkout_id: String,
    pub instrument: PaymentInstrument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub three_d_secure_result: Option<ThreeDSecureResult>,
    pub outcome: AttemptOutcome,
    pub created_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded)
    }
}

/// Result returned to the host for a completed payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub checkout_id: String,
    pub transaction_id: String,
    pub status: CheckoutStatus,
    /// Decimal amount as the host sent it
    pub amount: f64,
    pub currency: String,
    pub brand: String,
    pub holder_name: String,
    /// Always masked
    pub card_number: String,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(
        rename = "threeDSecureResult",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub three_d_secure_result: Option<ThreeDSecureResult>,
}

/// A finalized attempt as reported by `verifyPayment` and `getTransactionHistory`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub checkout_id: String,
    /// Absent for failed attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Current checkout status
    pub status: CheckoutStatus,
    pub amount: f64,
    pub currency: String,
    pub refunded_amount: f64,
    pub customer_email: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Result of `refundPayment`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub refund_id: String,
    pub transaction_id: String,
    pub checkout_id: String,
    /// Amount refunded by this call
    pub amount: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    /// Checkout status after the refund
    pub status: CheckoutStatus,
    /// Amount still refundable
    pub remaining: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}
