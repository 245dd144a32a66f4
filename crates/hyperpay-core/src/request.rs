//! # Request Types
//!
//! Arguments of the payment operations, in the host's camelCase wire shape.

use crate::card::CardDetails;
use crate::checkout::ChallengeCompletion;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Arguments of `processPayment` / `processPaymentWithUI`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentRequest {
    pub checkout_id: String,

    #[serde(flatten)]
    pub card: CardDetails,

    #[serde(rename = "enable3DSecure", default = "default_true")]
    pub enable_3d_secure: bool,

    /// Optional echo of the amount; must match the checkout when present
    #[serde(default)]
    pub amount: Option<f64>,

    #[serde(default)]
    pub currency: Option<String>,

    /// Passed to the gateway; overrides the checkout's own context
    #[serde(default, rename = "threeDSecureData")]
    pub three_d_secure_data: Option<serde_json::Value>,
}

impl ProcessPaymentRequest {
    pub fn new(checkout_id: impl Into<String>, card: CardDetails) -> Self {
        Self {
            checkout_id: checkout_id.into(),
            card,
            enable_3d_secure: true,
            amount: None,
            currency: None,
            three_d_secure_data: None,
        }
    }

    /// Builder: toggle 3-D Secure
    pub fn with_3d_secure(mut self, enabled: bool) -> Self {
        self.enable_3d_secure = enabled;
        self
    }

    /// Builder: attach 3-D Secure data for the gateway
    pub fn with_three_d_secure_data(mut self, data: serde_json::Value) -> Self {
        self.three_d_secure_data = Some(data);
        self
    }

    /// Builder: echo the amount the host expects to charge
    pub fn with_amount(mut self, amount: f64, currency: impl Into<String>) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency.into());
        self
    }
}

/// Arguments of `tokenizePaymentMethod`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenizeRequest {
    pub checkout_id: String,
    #[serde(flatten)]
    pub card: CardDetails,
}

impl TokenizeRequest {
    pub fn new(checkout_id: impl Into<String>, card: CardDetails) -> Self {
        Self {
            checkout_id: checkout_id.into(),
            card,
        }
    }
}

/// Arguments of `processPaymentWithToken`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPaymentRequest {
    pub checkout_id: String,
    pub token: String,
    pub amount: f64,
    pub currency: String,
}

impl TokenPaymentRequest {
    pub fn new(
        checkout_id: impl Into<String>,
        token: impl Into<String>,
        amount: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            checkout_id: checkout_id.into(),
            token: token.into(),
            amount,
            currency: currency.into(),
        }
    }
}

/// Arguments of operations that only name a checkout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutIdRequest {
    pub checkout_id: String,
}

/// Arguments of `completeChallenge`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteChallengeRequest {
    pub checkout_id: String,
    #[serde(flatten)]
    pub completion: ChallengeCompletion,
}

/// Arguments of `verifyPayment`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub transaction_id: String,
}

fn default_history_limit() -> usize {
    20
}

/// Arguments of `getTransactionHistory`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionHistoryRequest {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for TransactionHistoryRequest {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
            offset: 0,
        }
    }
}

impl TransactionHistoryRequest {
    pub fn page(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

/// Arguments of `refundPayment`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundPaymentRequest {
    pub transaction_id: String,
    /// Defaults to the remaining refundable amount
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RefundPaymentRequest {
    /// Refund whatever is left of the payment
    pub fn full(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            amount: None,
            currency: None,
            reason: None,
        }
    }

    /// Refund `amount` of the payment
    pub fn partial(transaction_id: impl Into<String>, amount: f64) -> Self {
        Self {
            amount: Some(amount),
            ..Self::full(transaction_id)
        }
    }

    /// Builder: record why the money goes back
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Arguments of `setLogLevel`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLogLevelRequest {
    #[serde(default)]
    pub level: String,
}
