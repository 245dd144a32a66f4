use async_trait::async_trait;
use hyperpay_core::gateway::{challenge_parameters, DEFAULT_ACS_URL};
use hyperpay_core::{
    AlwaysChallenge, Authorization, AuthorizationRequest, CardDetails, ChallengeCompletion,
    ChallengeParameters, Checkout, CheckoutRequest, CheckoutStatus, EventType, FixedDecision,
    InitializeRequest, NeverChallenge, PaymentError, PaymentGateway, PaymentInstrument,
    PaymentResult, PaymentSessionService, PolicyGateway, ProcessPaymentRequest,
    RefundPaymentRequest, ServiceConfig, Session, TokenPaymentRequest, TokenizeRequest,
    TransactionHistoryRequest, TOKENIZED_CARD_PLACEHOLDER,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn service_with(approve: bool) -> Arc<PaymentSessionService> {
    let policy = if approve {
        FixedDecision::approve_all()
    } else {
        FixedDecision::decline_all()
    };
    Arc::new(
        PaymentSessionService::new(Arc::new(PolicyGateway::new(Arc::new(policy))))
            .with_challenge_policy(Arc::new(NeverChallenge)),
    )
}

fn challenging_service() -> Arc<PaymentSessionService> {
    Arc::new(
        PaymentSessionService::new(Arc::new(PolicyGateway::new(Arc::new(
            FixedDecision::approve_all(),
        ))))
        .with_challenge_policy(Arc::new(AlwaysChallenge)),
    )
}

fn valid_card() -> CardDetails {
    CardDetails::new("Jane Doe", "4111111111111111", "12", "2030", "123").with_brand("VISA")
}

async fn initialized(service: &PaymentSessionService) {
    service
        .initialize(InitializeRequest::new("M1", "TOK1", false))
        .await
        .unwrap();
}

async fn open_checkout(service: &PaymentSessionService) -> String {
    service
        .create_checkout(CheckoutRequest::new(100.0, "USD", "a@b.com"))
        .await
        .unwrap()
        .checkout_id
}

#[tokio::test]
async fn initialize_and_dispose_toggle_initialized() {
    let service = service_with(true);
    assert!(!service.is_initialized().await);

    initialized(&service).await;
    assert!(service.is_initialized().await);

    service.dispose().await;
    assert!(!service.is_initialized().await);

    // idempotent
    service.dispose().await;
    assert!(!service.is_initialized().await);
}

#[tokio::test]
async fn initialize_rejects_missing_credentials() {
    let service = service_with(true);
    let err = service
        .initialize(InitializeRequest::new("", "TOK1", false))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));
    assert!(!service.is_initialized().await);
}

#[tokio::test]
async fn payment_operations_require_initialization() {
    let service = service_with(true);
    let mut events = service.subscribe().await;

    let err = service
        .create_checkout(CheckoutRequest::new(100.0, "USD", "a@b.com"))
        .await
        .unwrap_err();
    assert_eq!(err, PaymentError::NotInitialized);

    let err = service
        .process_payment(ProcessPaymentRequest::new("CHK_1", valid_card()))
        .await
        .unwrap_err();
    assert_eq!(err, PaymentError::NotInitialized);

    let err = service.get_payment_status("CHK_1").await.unwrap_err();
    assert_eq!(err, PaymentError::NotInitialized);

    let err = service
        .tokenize_payment_method(TokenizeRequest::new("CHK_1", valid_card()))
        .await
        .unwrap_err();
    assert_eq!(err, PaymentError::NotInitialized);

    let err = service
        .process_payment_with_token(TokenPaymentRequest::new("CHK_1", "TOKEN_x", 100.0, "USD"))
        .await
        .unwrap_err();
    assert_eq!(err, PaymentError::NotInitialized);

    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn create_checkout_validates_input() {
    let service = service_with(true);
    initialized(&service).await;

    for request in [
        CheckoutRequest::new(0.0, "USD", "a@b.com"),
        CheckoutRequest::new(-1.0, "USD", "a@b.com"),
        CheckoutRequest::new(10.0, "DOLLARS", "a@b.com"),
        CheckoutRequest::new(10.0, "XXX", "a@b.com"),
        CheckoutRequest::new(10.0, "USD", "not-an-email"),
    ] {
        let err = service.create_checkout(request).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidArgument(_)), "{:?}", err);
    }
}

#[tokio::test]
async fn checkout_ids_are_unique_within_a_session() {
    let service = service_with(true);
    initialized(&service).await;

    let mut ids = HashSet::new();
    for _ in 0..200 {
        let checkout = service
            .create_checkout(CheckoutRequest::new(5.0, "SAR", "a@b.com"))
            .await
            .unwrap();
        assert_eq!(checkout.status, CheckoutStatus::Pending);
        assert!(ids.insert(checkout.checkout_id));
    }
}

#[tokio::test]
async fn successful_payment_completes_checkout() {
    let service = service_with(true);
    initialized(&service).await;
    let mut events = service.subscribe().await;
    let checkout_id = open_checkout(&service).await;

    let receipt = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false))
        .await
        .unwrap();

    assert_eq!(receipt.status, CheckoutStatus::Completed);
    assert!(!receipt.transaction_id.is_empty());
    assert_eq!(receipt.card_number, "************1111");
    assert_eq!(receipt.amount, 100.0);
    assert_eq!(receipt.currency, "USD");
    assert_eq!(receipt.brand, "VISA");
    assert!(receipt.three_d_secure_result.is_none());

    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Completed
    );

    let emitted = events.drain();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].event_type, EventType::PaymentSuccess);
    assert_eq!(emitted[0].checkout_id, checkout_id);
    assert!(!emitted[0].data.to_string().contains("4111111111111111"));

    let attempt = service.payment_attempt(&checkout_id).await.unwrap().unwrap();
    assert!(attempt.is_success());
    assert!(matches!(attempt.instrument, PaymentInstrument::CardFingerprint(_)));
    assert_eq!(attempt.transaction_id.as_deref(), Some(receipt.transaction_id.as_str()));
}

#[tokio::test]
async fn completed_checkout_rejects_further_payments() {
    let service = service_with(true);
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;

    service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false))
        .await
        .unwrap();

    let err = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidState { .. }));
    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Completed
    );
}

#[tokio::test]
async fn declined_payment_fails_checkout() {
    let service = service_with(false);
    initialized(&service).await;
    let mut events = service.subscribe().await;
    let checkout_id = open_checkout(&service).await;

    let err = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::PaymentDeclined { .. }));
    assert!(err.is_retryable());

    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Failed
    );

    let err = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidState { .. }));

    let emitted = events.drain();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].event_type, EventType::PaymentFailed);
    assert_eq!(emitted[0].data["error"], "Payment processing failed");
}

#[tokio::test]
async fn invalid_card_is_rejected_before_claiming() {
    let service = service_with(true);
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;

    let mut card = valid_card();
    card.cvv = String::new();
    let err = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, card))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));
    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Pending
    );
}

#[tokio::test]
async fn unknown_checkout_is_not_found() {
    let service = service_with(true);
    initialized(&service).await;

    let err = service.get_payment_status("CHK_missing").await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));

    let err = service
        .process_payment(ProcessPaymentRequest::new("CHK_missing", valid_card()))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));
}

#[tokio::test]
async fn mismatched_amount_echo_leaves_checkout_pending() {
    let service = service_with(true);
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;

    let err = service
        .process_payment(
            ProcessPaymentRequest::new(&checkout_id, valid_card())
                .with_3d_secure(false)
                .with_amount(50.0, "USD"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));

    // the claim was released, so a correct attempt still goes through
    service
        .process_payment(
            ProcessPaymentRequest::new(&checkout_id, valid_card())
                .with_3d_secure(false)
                .with_amount(100.0, "USD"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn challenge_precedes_terminal_event() {
    let service = challenging_service();
    initialized(&service).await;
    let mut events = service.subscribe().await;
    let checkout_id = open_checkout(&service).await;

    let worker = {
        let service = service.clone();
        let checkout_id = checkout_id.clone();
        tokio::spawn(async move {
            service
                .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()))
                .await
        })
    };

    let challenge = events.recv().await.unwrap();
    assert_eq!(challenge.event_type, EventType::ChallengeRequired);
    assert_eq!(challenge.checkout_id, checkout_id);
    let params: ChallengeParameters = serde_json::from_value(challenge.data.clone()).unwrap();
    assert!(params.pa_req.starts_with("PA_REQ_"));
    assert!(params.md.starts_with("MD_"));

    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::ChallengeRequired
    );

    service
        .complete_challenge(
            &checkout_id,
            ChallengeCompletion {
                authentication_value: Some("AUTH_1".into()),
                eci: Some("05".into()),
                cavv: Some("CAVV_1".into()),
            },
        )
        .await
        .unwrap();

    let receipt = worker.await.unwrap().unwrap();
    let three_ds = receipt.three_d_secure_result.unwrap();
    assert_eq!(three_ds.authentication_value, "AUTH_1");
    assert_eq!(three_ds.eci, "05");
    assert_eq!(three_ds.cavv, "CAVV_1");

    let terminal = events.recv().await.unwrap();
    assert_eq!(terminal.event_type, EventType::PaymentSuccess);
    assert_eq!(terminal.checkout_id, checkout_id);
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn disabled_3d_secure_skips_challenge() {
    let service = challenging_service();
    initialized(&service).await;
    let mut events = service.subscribe().await;
    let checkout_id = open_checkout(&service).await;

    service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false))
        .await
        .unwrap();

    let emitted = events.drain();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].event_type, EventType::PaymentSuccess);
}

#[tokio::test]
async fn cancelled_challenge_fails_checkout() {
    let service = challenging_service();
    initialized(&service).await;
    let mut events = service.subscribe().await;
    let checkout_id = open_checkout(&service).await;

    let worker = {
        let service = service.clone();
        let checkout_id = checkout_id.clone();
        tokio::spawn(async move {
            service
                .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()))
                .await
        })
    };

    assert_eq!(
        events.recv().await.unwrap().event_type,
        EventType::ChallengeRequired
    );
    service.cancel_payment(&checkout_id).await.unwrap();

    let err = worker.await.unwrap().unwrap_err();
    assert!(matches!(err, PaymentError::PaymentCancelled { .. }));
    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Failed
    );

    let terminal = events.recv().await.unwrap();
    assert_eq!(terminal.event_type, EventType::PaymentFailed);
    assert_eq!(terminal.data["code"], "PAYMENT_CANCELLED");

    // nothing left to signal
    let err = service.cancel_payment(&checkout_id).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidState { .. }));
}

#[tokio::test(start_paused = true)]
async fn unanswered_challenge_times_out() {
    let service = Arc::new(
        PaymentSessionService::new(Arc::new(PolicyGateway::new(Arc::new(
            FixedDecision::approve_all(),
        ))))
        .with_challenge_policy(Arc::new(AlwaysChallenge))
        .with_config(ServiceConfig::default().with_challenge_timeout(Duration::from_secs(30))),
    );
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;

    let err = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::PaymentDeclined { .. }));
    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Failed
    );
}

#[tokio::test]
async fn dispose_cancels_open_challenge() {
    let service = challenging_service();
    initialized(&service).await;
    let mut events = service.subscribe().await;
    let checkout_id = open_checkout(&service).await;

    let worker = {
        let service = service.clone();
        let checkout_id = checkout_id.clone();
        tokio::spawn(async move {
            service
                .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()))
                .await
        })
    };

    assert_eq!(
        events.recv().await.unwrap().event_type,
        EventType::ChallengeRequired
    );
    service.dispose().await;

    let err = worker.await.unwrap().unwrap_err();
    assert!(matches!(err, PaymentError::PaymentCancelled { .. }));

    // the attempt belonged to the disposed session, so nothing is emitted for it
    assert!(events.recv().await.is_none());

    let err = service.get_payment_status(&checkout_id).await.unwrap_err();
    assert_eq!(err, PaymentError::NotInitialized);
}

#[tokio::test]
async fn completing_without_challenge_is_invalid_state() {
    let service = service_with(true);
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;

    let err = service
        .complete_challenge(&checkout_id, ChallengeCompletion::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidState { .. }));

    let err = service
        .complete_challenge("CHK_missing", ChallengeCompletion::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));
}

#[tokio::test]
async fn concurrent_payments_on_one_checkout_are_serialized() {
    let service = challenging_service();
    initialized(&service).await;
    let mut events = service.subscribe().await;
    let checkout_id = open_checkout(&service).await;

    let first = {
        let service = service.clone();
        let checkout_id = checkout_id.clone();
        tokio::spawn(async move {
            service
                .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()))
                .await
        })
    };

    // first attempt is parked on its challenge
    events.recv().await.unwrap();

    let err = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidState { .. }));

    service
        .complete_challenge(&checkout_id, ChallengeCompletion::default())
        .await
        .unwrap();
    let receipt = first.await.unwrap().unwrap();
    assert_eq!(receipt.three_d_secure_result.unwrap().eci, "05");
}

#[tokio::test]
async fn distinct_checkouts_process_concurrently() {
    let service = service_with(true);
    initialized(&service).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let checkout_id = open_checkout(&service).await;
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .process_payment(
                    ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false),
                )
                .await
        }));
    }

    let mut transactions = HashSet::new();
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert!(transactions.insert(receipt.transaction_id));
    }
}

#[tokio::test]
async fn tokenized_payment_flow() {
    let service = service_with(true);
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;

    let token = service
        .tokenize_payment_method(TokenizeRequest::new(&checkout_id, valid_card()))
        .await
        .unwrap();
    assert!(token.starts_with("TOKEN_"));
    assert!(!token.contains("4111111111111111"));

    // tokenization leaves the checkout alone
    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Pending
    );

    let receipt = service
        .process_payment_with_token(TokenPaymentRequest::new(&checkout_id, &token, 100.0, "USD"))
        .await
        .unwrap();
    assert_eq!(receipt.brand, "TOKENIZED");
    assert_eq!(receipt.card_number, TOKENIZED_CARD_PLACEHOLDER);
    assert_eq!(receipt.holder_name, "Tokenized Payment");

    let attempt = service.payment_attempt(&checkout_id).await.unwrap().unwrap();
    assert_eq!(attempt.instrument, PaymentInstrument::Token(token));
}

#[tokio::test]
async fn token_payment_validates_arguments() {
    let service = service_with(true);
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;

    let err = service
        .process_payment_with_token(TokenPaymentRequest::new(&checkout_id, " ", 100.0, "USD"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));

    let err = service
        .process_payment_with_token(TokenPaymentRequest::new(&checkout_id, "TOKEN_x", 100.0, "SAR"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));

    let err = service
        .tokenize_payment_method(TokenizeRequest::new("CHK_missing", valid_card()))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));
}

#[tokio::test]
async fn token_payment_requires_a_token_issued_for_the_checkout() {
    let service = service_with(true);
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;
    let other_id = open_checkout(&service).await;

    let other_token = service
        .tokenize_payment_method(TokenizeRequest::new(&other_id, valid_card()))
        .await
        .unwrap();

    for token in ["TOKEN_x", "tok_visa", other_token.as_str()] {
        let err = service
            .process_payment_with_token(TokenPaymentRequest::new(&checkout_id, token, 100.0, "USD"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidArgument(_)), "{}", token);
    }
    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Pending
    );

    // a token from a replaced session no longer verifies
    let stale = service
        .tokenize_payment_method(TokenizeRequest::new(&checkout_id, valid_card()))
        .await
        .unwrap();
    service
        .initialize(InitializeRequest::new("M1", "TOK2", false))
        .await
        .unwrap();
    let fresh_id = open_checkout(&service).await;
    let err = service
        .process_payment_with_token(TokenPaymentRequest::new(&fresh_id, &stale, 100.0, "USD"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));
}

#[tokio::test]
async fn declined_token_payment_emits_failure() {
    let service = service_with(false);
    initialized(&service).await;
    let mut events = service.subscribe().await;
    let checkout_id = open_checkout(&service).await;

    let token = service
        .tokenize_payment_method(TokenizeRequest::new(&checkout_id, valid_card()))
        .await
        .unwrap();

    let err = service
        .process_payment_with_token(TokenPaymentRequest::new(&checkout_id, &token, 100.0, "USD"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::PaymentDeclined { .. }));

    let emitted = events.drain();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].event_type, EventType::PaymentFailed);
}

struct UnreachableGateway;

#[async_trait]
impl PaymentGateway for UnreachableGateway {
    fn provider_name(&self) -> &'static str {
        "unreachable"
    }

    async fn begin_challenge(
        &self,
        _session: &Session,
        _checkout: &Checkout,
    ) -> PaymentResult<ChallengeParameters> {
        Err(PaymentError::TransportFailure("connection refused".into()))
    }

    async fn authorize(&self, _request: AuthorizationRequest<'_>) -> PaymentResult<Authorization> {
        Err(PaymentError::TransportFailure("connection refused".into()))
    }
}

#[tokio::test]
async fn transport_failure_is_distinct_from_decline() {
    let service = PaymentSessionService::new(Arc::new(UnreachableGateway))
        .with_challenge_policy(Arc::new(NeverChallenge));
    initialized(&service).await;
    let mut events = service.subscribe().await;
    let checkout_id = open_checkout(&service).await;

    let err = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::TransportFailure(_)));
    assert!(err.is_retryable());

    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Failed
    );
    let emitted = events.drain();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].data["code"], "TRANSPORT_FAILURE");
}

#[tokio::test]
async fn dispose_then_reinitialize_recovers() {
    let service = service_with(true);
    initialized(&service).await;
    open_checkout(&service).await;
    service.dispose().await;

    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;
    let receipt = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false))
        .await
        .unwrap();
    assert_eq!(receipt.status, CheckoutStatus::Completed);
}

/// Approves everything after a fixed delay and remembers what it saw
#[derive(Default)]
struct SlowGateway {
    prepared: Mutex<Vec<String>>,
    three_d_secure_data: Mutex<Vec<Option<Value>>>,
}

const GATEWAY_DELAY: Duration = Duration::from_millis(100);

#[async_trait]
impl PaymentGateway for SlowGateway {
    fn provider_name(&self) -> &'static str {
        "slow"
    }

    async fn prepare_checkout(&self, _session: &Session, checkout: &Checkout) -> PaymentResult<()> {
        self.prepared.lock().unwrap().push(checkout.checkout_id.clone());
        tokio::time::sleep(GATEWAY_DELAY).await;
        Ok(())
    }

    async fn begin_challenge(
        &self,
        _session: &Session,
        _checkout: &Checkout,
    ) -> PaymentResult<ChallengeParameters> {
        Ok(challenge_parameters(DEFAULT_ACS_URL))
    }

    async fn authorize(&self, request: AuthorizationRequest<'_>) -> PaymentResult<Authorization> {
        self.three_d_secure_data
            .lock()
            .unwrap()
            .push(request.three_d_secure_data.cloned());
        tokio::time::sleep(GATEWAY_DELAY).await;
        Ok(Authorization::approved())
    }
}

fn slow_service() -> (Arc<PaymentSessionService>, Arc<SlowGateway>) {
    let gateway = Arc::new(SlowGateway::default());
    let service = Arc::new(
        PaymentSessionService::new(gateway.clone()).with_challenge_policy(Arc::new(NeverChallenge)),
    );
    (service, gateway)
}

#[tokio::test(start_paused = true)]
async fn checkout_opened_across_reinitialize_is_dropped() {
    let (service, gateway) = slow_service();
    initialized(&service).await;

    let opening = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .create_checkout(CheckoutRequest::new(100.0, "USD", "a@b.com"))
                .await
        })
    };
    tokio::time::sleep(GATEWAY_DELAY / 10).await;

    service.dispose().await;
    service
        .initialize(InitializeRequest::new("M2", "TOK2", false))
        .await
        .unwrap();

    let err = opening.await.unwrap().unwrap_err();
    assert!(matches!(err, PaymentError::PaymentCancelled { .. }));

    let stale_id = gateway.prepared.lock().unwrap()[0].clone();
    let err = service.get_payment_status(&stale_id).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn payment_settling_after_reinitialize_reaches_nobody() {
    let (service, _) = slow_service();
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;

    let paying = {
        let service = service.clone();
        let checkout_id = checkout_id.clone();
        tokio::spawn(async move {
            service
                .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()))
                .await
        })
    };
    tokio::time::sleep(GATEWAY_DELAY / 10).await;

    service.dispose().await;
    service
        .initialize(InitializeRequest::new("M2", "TOK2", false))
        .await
        .unwrap();
    let mut events = service.subscribe().await;

    let err = paying.await.unwrap().unwrap_err();
    assert!(matches!(err, PaymentError::PaymentCancelled { .. }));
    assert!(events.drain().is_empty());

    let err = service.get_payment_status(&checkout_id).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));

    // the new session works normally
    let checkout_id = open_checkout(&service).await;
    service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()))
        .await
        .unwrap();
    assert_eq!(events.drain().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn three_d_secure_data_reaches_the_gateway() {
    let (service, gateway) = slow_service();
    initialized(&service).await;

    let mut request = CheckoutRequest::new(100.0, "USD", "a@b.com");
    request.three_d_secure = Some(json!({ "challengeIndicator": "04" }));
    let with_context = service.create_checkout(request).await.unwrap().checkout_id;
    service
        .process_payment(ProcessPaymentRequest::new(&with_context, valid_card()))
        .await
        .unwrap();

    let checkout_id = open_checkout(&service).await;
    service
        .process_payment(
            ProcessPaymentRequest::new(&checkout_id, valid_card())
                .with_three_d_secure_data(json!({ "deviceChannel": "app" })),
        )
        .await
        .unwrap();

    let seen = gateway.three_d_secure_data.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            Some(json!({ "challengeIndicator": "04" })),
            Some(json!({ "deviceChannel": "app" })),
        ]
    );
}

async fn paid_checkout(service: &PaymentSessionService) -> (String, String) {
    let checkout_id = open_checkout(service).await;
    let receipt = service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false))
        .await
        .unwrap();
    (checkout_id, receipt.transaction_id)
}

#[tokio::test]
async fn verify_payment_reports_settled_transactions() {
    let service = service_with(true);
    initialized(&service).await;
    let (checkout_id, transaction_id) = paid_checkout(&service).await;

    let record = service.verify_payment(&transaction_id).await.unwrap();
    assert_eq!(record.checkout_id, checkout_id);
    assert_eq!(record.status, CheckoutStatus::Completed);
    assert_eq!(record.amount, 100.0);
    assert_eq!(record.customer_email, "a@b.com");

    let err = service.verify_payment("TXN_unknown").await.unwrap_err();
    assert!(matches!(err, PaymentError::TransactionNotFound { .. }));
    assert_eq!(err.code(), "NOT_FOUND");

    service.dispose().await;
    let err = service.verify_payment(&transaction_id).await.unwrap_err();
    assert_eq!(err, PaymentError::NotInitialized);
}

#[tokio::test]
async fn transaction_history_pages_newest_first() {
    let service = service_with(true);
    initialized(&service).await;

    let mut transactions = Vec::new();
    for _ in 0..5 {
        transactions.push(paid_checkout(&service).await.1);
    }
    // open but unpaid checkouts are not transactions
    open_checkout(&service).await;

    let all = service
        .transaction_history(TransactionHistoryRequest::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
    let newest_first: Vec<String> = transactions.iter().rev().cloned().collect();
    let listed: Vec<String> = all
        .iter()
        .map(|r| r.transaction_id.clone().unwrap())
        .collect();
    assert_eq!(listed, newest_first);

    let page = service
        .transaction_history(TransactionHistoryRequest::page(2, 3))
        .await
        .unwrap();
    assert_eq!(page, all[3..5].to_vec());

    let past_end = service
        .transaction_history(TransactionHistoryRequest::page(10, 50))
        .await
        .unwrap();
    assert!(past_end.is_empty());

    let err = service
        .transaction_history(TransactionHistoryRequest::page(0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));
}

#[tokio::test]
async fn history_includes_failed_attempts_without_transaction_id() {
    let service = service_with(false);
    initialized(&service).await;
    let checkout_id = open_checkout(&service).await;
    service
        .process_payment(ProcessPaymentRequest::new(&checkout_id, valid_card()).with_3d_secure(false))
        .await
        .unwrap_err();

    let history = service
        .transaction_history(TransactionHistoryRequest::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, CheckoutStatus::Failed);
    assert!(history[0].transaction_id.is_none());
}

#[tokio::test]
async fn partial_then_full_refund() {
    let service = service_with(true);
    initialized(&service).await;
    let (checkout_id, transaction_id) = paid_checkout(&service).await;

    let first = service
        .refund_payment(RefundPaymentRequest::partial(&transaction_id, 40.0).with_reason("damaged"))
        .await
        .unwrap();
    assert!(first.refund_id.starts_with("REF_"));
    assert_eq!(first.amount, 40.0);
    assert_eq!(first.remaining, 60.0);
    assert_eq!(first.status, CheckoutStatus::Completed);
    assert_eq!(first.reason.as_deref(), Some("damaged"));

    let err = service
        .refund_payment(RefundPaymentRequest::partial(&transaction_id, 60.01))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));

    let rest = service
        .refund_payment(RefundPaymentRequest::full(&transaction_id))
        .await
        .unwrap();
    assert_eq!(rest.amount, 60.0);
    assert_eq!(rest.remaining, 0.0);
    assert_eq!(rest.status, CheckoutStatus::Refunded);
    assert_ne!(first.refund_id, rest.refund_id);

    assert_eq!(
        service.get_payment_status(&checkout_id).await.unwrap(),
        CheckoutStatus::Refunded
    );
    let record = service.verify_payment(&transaction_id).await.unwrap();
    assert_eq!(record.refunded_amount, 100.0);

    let err = service
        .refund_payment(RefundPaymentRequest::full(&transaction_id))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidState { .. }));
}

#[tokio::test]
async fn refund_requires_a_settled_payment() {
    let service = service_with(true);
    initialized(&service).await;

    let err = service
        .refund_payment(RefundPaymentRequest::full("TXN_unknown"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::TransactionNotFound { .. }));

    let err = service
        .refund_payment(RefundPaymentRequest::full(" "))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));

    let (_, transaction_id) = paid_checkout(&service).await;
    let mut request = RefundPaymentRequest::partial(&transaction_id, 10.0);
    request.currency = Some("SAR".into());
    let err = service.refund_payment(request).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidArgument(_)));
}
