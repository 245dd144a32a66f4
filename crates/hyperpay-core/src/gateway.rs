//! # Payment Gateway Trait
//!
//! The seam between the session service and whatever actually moves money.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PaymentGateway (trait)                     │
//! │  ├── prepare_checkout()                                     │
//! │  ├── begin_challenge()                                      │
//! │  ├── authorize()                                            │
//! │  ├── refund()                                               │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!          ┌─────────────────┼─────────────────┐
//!          │                 │                 │
//!  ┌───────┴───────┐ ┌───────┴───────┐ ┌───────┴───────┐
//!  │ PolicyGateway │ │SandboxGateway │ │  HyperPay     │
//!  │  (in-process) │ │(hyperpay-     │ │  (future)     │
//!  │               │ │  sandbox)     │ │               │
//!  └───────────────┘ └───────────────┘ └───────────────┘
//! ```
//!
//! Gateways report unreachable collaborators as
//! `PaymentError::TransportFailure` and business rejections as
//! `Authorization::Declined`.

use crate::card::CardDetails;
use crate::checkout::{
    ChallengeCompletion, ChallengeParameters, Checkout, PaymentInstrument, ThreeDSecureResult,
};
use crate::error::PaymentResult;
use crate::money::Money;
use crate::policy::BoxedSuccessPolicy;
use crate::session::Session;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// ECI reported for a fully authenticated Visa challenge
pub const AUTHENTICATED_ECI: &str = "05";

/// Everything a gateway sees when authorizing a payment
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    pub session: &'a Session,
    pub checkout: &'a Checkout,
    pub instrument: &'a PaymentInstrument,
    /// Present for card payments, absent for token payments
    pub card: Option<&'a CardDetails>,
    /// Present when the 3-D Secure challenge path was taken
    pub challenge: Option<&'a ChallengeCompletion>,
    /// Host-supplied 3-D Secure data, falling back to the checkout's context
    pub three_d_secure_data: Option<&'a serde_json::Value>,
}

/// Everything a gateway sees when refunding a settled payment
#[derive(Debug, Clone, Copy)]
pub struct RefundRequest<'a> {
    pub session: &'a Session,
    pub checkout: &'a Checkout,
    pub transaction_id: &'a str,
    pub amount: Money,
    pub reason: Option<&'a str>,
}

/// Gateway decision for one authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Approved {
        /// Gateway reference; the service generates one when absent
        transaction_id: Option<String>,
        three_d_secure: Option<ThreeDSecureResult>,
    },
    Declined {
        reason: String,
    },
}

impl Authorization {
    pub fn approved() -> Self {
        Authorization::Approved {
            transaction_id: None,
            three_d_secure: None,
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        Authorization::Declined {
            reason: reason.into(),
        }
    }
}

/// Core trait for gateway implementations
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name (for logging)
    fn provider_name(&self) -> &'static str;

    /// Register a new checkout with the gateway
    async fn prepare_checkout(&self, _session: &Session, _checkout: &Checkout) -> PaymentResult<()> {
        Ok(())
    }

    /// Open a 3-D Secure challenge and return what the host must present
    async fn begin_challenge(
        &self,
        session: &Session,
        checkout: &Checkout,
    ) -> PaymentResult<ChallengeParameters>;

    /// Authorize the payment
    async fn authorize(&self, request: AuthorizationRequest<'_>) -> PaymentResult<Authorization>;

    /// Refund part or all of a settled payment. Returns the gateway's refund
    /// reference; the service generates one when absent.
    async fn refund(&self, _request: RefundRequest<'_>) -> PaymentResult<Option<String>> {
        Ok(None)
    }
}

/// Type alias for a shared gateway (dynamic dispatch)
pub type BoxedPaymentGateway = Arc<dyn PaymentGateway>;

/// Challenge parameters with fresh opaque tokens
pub fn challenge_parameters(acs_url: &str) -> ChallengeParameters {
    ChallengeParameters {
        acs_url: acs_url.to_string(),
        pa_req: format!("PA_REQ_{}", Uuid::new_v4().simple()),
        md: format!("MD_{}", Uuid::new_v4().simple()),
    }
}

/// Fill in whatever the host did not report after the challenge
pub fn resolve_three_d_secure(completion: &ChallengeCompletion) -> ThreeDSecureResult {
    ThreeDSecureResult {
        authentication_value: completion
            .authentication_value
            .clone()
            .unwrap_or_else(|| format!("AUTH_{}", Uuid::new_v4().simple())),
        eci: completion
            .eci
            .clone()
            .unwrap_or_else(|| AUTHENTICATED_ECI.to_string()),
        cavv: completion
            .cavv
            .clone()
            .unwrap_or_else(|| format!("CAVV_{}", Uuid::new_v4().simple())),
    }
}

/// ACS URL handed out by `PolicyGateway`
pub const DEFAULT_ACS_URL: &str = "https://acs.example.com";

/// In-process gateway driven purely by a `SuccessPolicy`. No latency, no I/O.
pub struct PolicyGateway {
    policy: BoxedSuccessPolicy,
}

impl PolicyGateway {
    pub fn new(policy: BoxedSuccessPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl PaymentGateway for PolicyGateway {
    fn provider_name(&self) -> &'static str {
        "policy"
    }

    async fn begin_challenge(
        &self,
        _session: &Session,
        _checkout: &Checkout,
    ) -> PaymentResult<ChallengeParameters> {
        Ok(challenge_parameters(DEFAULT_ACS_URL))
    }

    #[instrument(skip_all, fields(checkout_id = %request.checkout.checkout_id))]
    async fn authorize(&self, request: AuthorizationRequest<'_>) -> PaymentResult<Authorization> {
        if !self.policy.approve(&request) {
            debug!("Policy declined authorization");
            return Ok(Authorization::declined("Payment processing failed"));
        }
        Ok(Authorization::Approved {
            transaction_id: None,
            three_d_secure: request.challenge.map(resolve_three_d_secure),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_parameters_are_fresh() {
        let a = challenge_parameters("https://acs.example.com");
        let b = challenge_parameters("https://acs.example.com");
        assert_eq!(a.acs_url, "https://acs.example.com");
        assert_ne!(a.pa_req, b.pa_req);
        assert_ne!(a.md, b.md);
    }

    #[test]
    fn test_resolve_three_d_secure_keeps_reported_values() {
        let completion = ChallengeCompletion {
            authentication_value: Some("AV".into()),
            eci: Some("02".into()),
            cavv: None,
        };
        let result = resolve_three_d_secure(&completion);
        assert_eq!(result.authentication_value, "AV");
        assert_eq!(result.eci, "02");
        assert!(result.cavv.starts_with("CAVV_"));

        let defaults = resolve_three_d_secure(&ChallengeCompletion::default());
        assert_eq!(defaults.eci, AUTHENTICATED_ECI);
    }
}
