//! # Sandbox Gateway
//!
//! Simulates a remote payment gateway: every call waits out the configured
//! latency, authorizations are decided by a `SuccessPolicy`, and challenges
//! point at the configured ACS URL.

use crate::config::SandboxConfig;
use crate::policy::RandomApproval;
use async_trait::async_trait;
use hyperpay_core::gateway::{challenge_parameters, resolve_three_d_secure};
use hyperpay_core::{
    Authorization, AuthorizationRequest, BoxedSuccessPolicy, CardPrefixChallenge,
    ChallengeParameters, Checkout, PaymentGateway, PaymentResult, PaymentSessionService,
    RefundRequest, Session,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Reason reported when the sandbox declines
pub const SANDBOX_DECLINE_REASON: &str = "Payment processing failed";

/// Simulated gateway
pub struct SandboxGateway {
    config: SandboxConfig,
    policy: BoxedSuccessPolicy,
}

impl SandboxGateway {
    /// Create a gateway approving at `config.approval_rate`.
    /// An out-of-range rate is clamped, and NaN declines everything.
    pub fn new(config: SandboxConfig) -> Self {
        if let Err(e) = config.validate() {
            warn!("Sandbox config is invalid, continuing with clamped values: {}", e);
        }
        let policy = Arc::new(RandomApproval::new(config.approval_rate, config.seed));
        Self { config, policy }
    }

    /// Create from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        let config = SandboxConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Builder: replace the approval policy
    pub fn with_policy(mut self, policy: BoxedSuccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Challenge policy matching the configured card prefixes
    pub fn challenge_policy(&self) -> CardPrefixChallenge {
        CardPrefixChallenge::new(self.config.challenge_prefixes.iter().cloned())
    }

    /// A payment-session service backed by this gateway
    pub fn into_service(self) -> PaymentSessionService {
        let challenge_policy = Arc::new(self.challenge_policy());
        PaymentSessionService::new(Arc::new(self)).with_challenge_policy(challenge_policy)
    }

    async fn simulate_latency(&self) {
        let latency = self.config.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn provider_name(&self) -> &'static str {
        "sandbox"
    }

    #[instrument(skip_all, fields(checkout_id = %checkout.checkout_id))]
    async fn prepare_checkout(&self, session: &Session, checkout: &Checkout) -> PaymentResult<()> {
        self.simulate_latency().await;
        debug!(
            "Sandbox checkout registered for merchant {} ({})",
            session.merchant_id,
            session.environment()
        );
        Ok(())
    }

    #[instrument(skip_all, fields(checkout_id = %checkout.checkout_id))]
    async fn begin_challenge(
        &self,
        _session: &Session,
        checkout: &Checkout,
    ) -> PaymentResult<ChallengeParameters> {
        self.simulate_latency().await;
        let params = challenge_parameters(&self.config.acs_url);
        debug!("Sandbox challenge opened at {}", params.acs_url);
        Ok(params)
    }

    #[instrument(skip_all, fields(checkout_id = %request.checkout.checkout_id))]
    async fn authorize(&self, request: AuthorizationRequest<'_>) -> PaymentResult<Authorization> {
        self.simulate_latency().await;

        if !self.policy.approve(&request) {
            info!("Sandbox declined {}", request.checkout.amount.display());
            return Ok(Authorization::declined(SANDBOX_DECLINE_REASON));
        }

        Ok(Authorization::Approved {
            transaction_id: Some(format!("TXN_{}", Uuid::new_v4().simple())),
            three_d_secure: request.challenge.map(resolve_three_d_secure),
        })
    }

    #[instrument(skip_all, fields(transaction_id = %request.transaction_id))]
    async fn refund(&self, request: RefundRequest<'_>) -> PaymentResult<Option<String>> {
        self.simulate_latency().await;
        info!("Sandbox refunded {}", request.amount.display());
        Ok(Some(format!("REF_{}", Uuid::new_v4().simple())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperpay_core::{
        CardDetails, ChallengePolicy, Currency, FixedDecision, InitializeRequest, Money,
        PaymentInstrument,
    };
    use std::time::Duration;

    fn fixtures() -> (Session, Checkout, PaymentInstrument) {
        (
            Session::from_request(InitializeRequest::new("M1", "TOK1", false)).unwrap(),
            Checkout::new(
                "CHK_1",
                Money::from_decimal(100.0, Currency::USD).unwrap(),
                "a@b.com",
            ),
            PaymentInstrument::Token("TOKEN_x".into()),
        )
    }

    #[tokio::test]
    async fn test_approved_authorization_carries_transaction_id() {
        let gateway = SandboxGateway::new(SandboxConfig::default())
            .with_policy(Arc::new(FixedDecision::approve_all()));
        let (session, checkout, instrument) = fixtures();

        let decision = gateway
            .authorize(AuthorizationRequest {
                session: &session,
                checkout: &checkout,
                instrument: &instrument,
                card: None,
                challenge: None,
                three_d_secure_data: None,
            })
            .await
            .unwrap();

        match decision {
            Authorization::Approved {
                transaction_id,
                three_d_secure,
            } => {
                assert!(transaction_id.unwrap().starts_with("TXN_"));
                assert!(three_d_secure.is_none());
            }
            other => panic!("expected approval, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decline_reason() {
        let gateway = SandboxGateway::new(SandboxConfig::default().with_approval_rate(0.0));
        let (session, checkout, instrument) = fixtures();

        let decision = gateway
            .authorize(AuthorizationRequest {
                session: &session,
                checkout: &checkout,
                instrument: &instrument,
                card: None,
                challenge: None,
                three_d_secure_data: None,
            })
            .await
            .unwrap();
        assert_eq!(decision, Authorization::declined(SANDBOX_DECLINE_REASON));
    }

    #[tokio::test]
    async fn test_nan_approval_rate_declines_instead_of_panicking() {
        let gateway = SandboxGateway::new(SandboxConfig::default().with_approval_rate(f64::NAN));
        let (session, checkout, instrument) = fixtures();

        let decision = gateway
            .authorize(AuthorizationRequest {
                session: &session,
                checkout: &checkout,
                instrument: &instrument,
                card: None,
                challenge: None,
                three_d_secure_data: None,
            })
            .await
            .unwrap();
        assert_eq!(decision, Authorization::declined(SANDBOX_DECLINE_REASON));
    }

    #[tokio::test]
    async fn test_refund_reference() {
        let gateway = SandboxGateway::new(SandboxConfig::default());
        let (session, checkout, _) = fixtures();

        let reference = gateway
            .refund(RefundRequest {
                session: &session,
                checkout: &checkout,
                transaction_id: "TXN_1",
                amount: checkout.amount,
                reason: None,
            })
            .await
            .unwrap();
        assert!(reference.unwrap().starts_with("REF_"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let gateway = SandboxGateway::new(
            SandboxConfig::default().with_latency(Duration::from_millis(1500)),
        );
        let (session, checkout, _) = fixtures();

        let started = tokio::time::Instant::now();
        let params = gateway.begin_challenge(&session, &checkout).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert_eq!(params.acs_url, gateway.config().acs_url);
    }

    #[test]
    fn test_challenge_policy_follows_config() {
        let gateway = SandboxGateway::new(SandboxConfig {
            challenge_prefixes: vec!["5200".into()],
            ..SandboxConfig::default()
        });
        let policy = gateway.challenge_policy();

        let card = CardDetails::new("Jane Doe", "5200828282828210", "12", "2030", "123");
        assert!(policy.requires_challenge(&card));
        let card = CardDetails::new("Jane Doe", "4000123412341234", "12", "2030", "123");
        assert!(!policy.requires_challenge(&card));
    }
}
