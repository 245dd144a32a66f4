//! # Payment Session Service
//!
//! Owns the merchant session, the checkouts opened under it, and the event
//! hub. Every operation is async and returns a structured `PaymentError`
//! instead of panicking.
//!
//! Checkout records live in a book behind one mutex. The book carries a
//! generation that `initialize` and `dispose` bump; an operation remembers
//! the generation it started under and may only write to the book, or emit
//! events, while that generation is still current. The lock is held across
//! an await only while emitting, so no event outlives its session.
//!
//! A payment attempt first *claims* its checkout; a second attempt on the
//! same checkout is rejected with `InvalidState` until the first settles,
//! and for good once it has.

use crate::card::{CardDetails, TOKENIZED_CARD_PLACEHOLDER};
use crate::checkout::{
    is_valid_email, AttemptOutcome, ChallengeCompletion, Checkout, CheckoutRequest,
    CheckoutStatus, PaymentAttempt, PaymentInstrument, PaymentReceipt, RefundReceipt,
    TransactionRecord,
};
use crate::error::{PaymentError, PaymentResult};
use crate::event::{EventHub, EventSubscription, EventType, PaymentEvent};
use crate::gateway::{
    resolve_three_d_secure, Authorization, AuthorizationRequest, BoxedPaymentGateway,
    RefundRequest,
};
use crate::ids::{issue_payment_token, verify_payment_token, IdGenerator};
use crate::money::{Currency, Money};
use crate::policy::{BoxedChallengePolicy, CardPrefixChallenge};
use crate::request::{
    ProcessPaymentRequest, RefundPaymentRequest, TokenPaymentRequest, TokenizeRequest,
    TransactionHistoryRequest,
};
use crate::session::{InitializeRequest, LogLevel, Session};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Version reported by `getSDKVersion`
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Receives log level changes requested by the host
pub type LogLevelHook = Arc<dyn Fn(LogLevel) + Send + Sync>;

/// Service tuning
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How long a 3-D Secure challenge may stay open before the attempt is declined
    pub challenge_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            challenge_timeout: Duration::from_secs(300),
        }
    }
}

impl ServiceConfig {
    pub fn with_challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = timeout;
        self
    }
}

enum ChallengeSignal {
    Completed(ChallengeCompletion),
    Cancelled,
}

/// Largest page `transaction_history` returns
pub const MAX_HISTORY_PAGE: usize = 100;

struct CheckoutEntry {
    checkout: Checkout,
    in_flight: bool,
    challenge: Option<oneshot::Sender<ChallengeSignal>>,
    attempt: Option<PaymentAttempt>,
    /// Refunded so far, in minor units
    refunded: i64,
}

impl CheckoutEntry {
    fn new(checkout: Checkout) -> Self {
        Self {
            checkout,
            in_flight: false,
            challenge: None,
            attempt: None,
            refunded: 0,
        }
    }

    fn record(&self) -> Option<TransactionRecord> {
        let attempt = self.attempt.as_ref()?;
        let currency = self.checkout.amount.currency;
        Some(TransactionRecord {
            checkout_id: self.checkout.checkout_id.clone(),
            transaction_id: attempt.transaction_id.clone(),
            status: self.checkout.status,
            amount: self.checkout.amount.as_decimal(),
            currency: currency.to_string(),
            refunded_amount: currency.from_minor_units(self.refunded),
            customer_email: self.checkout.customer_email.clone(),
            timestamp: attempt.created_at,
        })
    }
}

/// Checkouts of the active session
#[derive(Default)]
struct CheckoutBook {
    generation: u64,
    entries: HashMap<String, CheckoutEntry>,
}

impl CheckoutBook {
    /// Start a new generation. Dropping the entries closes every pending
    /// challenge channel, which cancels the suspended attempts.
    fn reset(&mut self) -> usize {
        self.generation += 1;
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Entries, if `generation` is still current
    fn current(&mut self, generation: u64) -> Option<&mut HashMap<String, CheckoutEntry>> {
        (self.generation == generation).then_some(&mut self.entries)
    }

    fn by_transaction(&mut self, transaction_id: &str) -> Option<&mut CheckoutEntry> {
        self.entries.values_mut().find(|entry| {
            entry
                .attempt
                .as_ref()
                .and_then(|a| a.transaction_id.as_deref())
                == Some(transaction_id)
        })
    }
}

/// The session an operation runs under
struct ActiveSession {
    session: Session,
    generation: u64,
}

fn cancelled(checkout_id: &str) -> PaymentError {
    PaymentError::PaymentCancelled {
        checkout_id: checkout_id.to_string(),
    }
}

/// How the charged instrument shows up on the receipt
struct ReceiptCard {
    brand: String,
    holder_name: String,
    card_number: String,
    message: &'static str,
}

impl ReceiptCard {
    fn for_card(card: &CardDetails, session: &Session) -> Self {
        let brand = match card.brand.as_deref().map(str::trim) {
            Some(b) if !b.is_empty() => b.to_ascii_uppercase(),
            _ => session
                .brand
                .clone()
                .unwrap_or_else(|| card.resolved_brand()),
        };
        Self {
            brand,
            holder_name: card.holder_name.trim().to_string(),
            card_number: card.masked_number(),
            message: "Payment processed successfully",
        }
    }

    fn tokenized() -> Self {
        Self {
            brand: "TOKENIZED".to_string(),
            holder_name: "Tokenized Payment".to_string(),
            card_number: TOKENIZED_CARD_PLACEHOLDER.to_string(),
            message: "Payment processed successfully with token",
        }
    }
}

/// The payment-session service. Construct one per host; nothing is global.
pub struct PaymentSessionService {
    gateway: BoxedPaymentGateway,
    challenge_policy: BoxedChallengePolicy,
    config: ServiceConfig,
    session: RwLock<Option<Session>>,
    checkouts: Mutex<CheckoutBook>,
    events: EventHub,
    ids: IdGenerator,
    log_level: RwLock<LogLevel>,
    log_level_hook: Option<LogLevelHook>,
}

impl PaymentSessionService {
    /// Create a service backed by `gateway`, challenging `4000` test cards
    pub fn new(gateway: BoxedPaymentGateway) -> Self {
        Self {
            gateway,
            challenge_policy: Arc::new(CardPrefixChallenge::default()),
            config: ServiceConfig::default(),
            session: RwLock::new(None),
            checkouts: Mutex::new(CheckoutBook::default()),
            events: EventHub::new(),
            ids: IdGenerator::new(),
            log_level: RwLock::new(LogLevel::default()),
            log_level_hook: None,
        }
    }

    /// Builder: set the 3-D Secure challenge policy
    pub fn with_challenge_policy(mut self, policy: BoxedChallengePolicy) -> Self {
        self.challenge_policy = policy;
        self
    }

    /// Builder: set service tuning
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder: forward `setLogLevel` to an observability sink
    pub fn with_log_level_hook(mut self, hook: LogLevelHook) -> Self {
        self.log_level_hook = Some(hook);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.gateway.provider_name()
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Store new merchant credentials, replacing any previous session.
    /// Checkouts of the replaced session are discarded.
    #[instrument(skip(self, request), fields(merchant_id = %request.merchant_id))]
    pub async fn initialize(&self, request: InitializeRequest) -> PaymentResult<()> {
        let session = Session::from_request(request)?;
        info!(
            "Initializing SDK with merchantId: {}, environment: {}",
            session.merchant_id,
            session.environment()
        );

        let mut slot = self.session.write().await;
        let discarded = self.checkouts.lock().await.reset();
        if slot.replace(session).is_some() {
            debug!("Replaced previous session, discarded {} checkouts", discarded);
        }
        drop(slot);

        info!("SDK initialized successfully");
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub fn sdk_version(&self) -> &'static str {
        SDK_VERSION
    }

    /// Clear the session, every checkout and the event subscriber. Idempotent.
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        let mut slot = self.session.write().await;
        let had_session = slot.take().is_some();
        let discarded = {
            let mut book = self.checkouts.lock().await;
            let discarded = book.reset();
            self.events.unsubscribe().await;
            discarded
        };
        drop(slot);
        if had_session {
            info!("SDK disposed, discarded {} checkouts", discarded);
        } else {
            debug!("Dispose called without an active session");
        }
    }

    /// Apply a host-requested log level
    pub async fn set_log_level(&self, level: &str) -> PaymentResult<LogLevel> {
        let level: LogLevel = level.parse()?;
        *self.log_level.write().await = level;
        if let Some(hook) = &self.log_level_hook {
            hook(level);
        }
        info!("Log level set to {}", level);
        Ok(level)
    }

    pub async fn log_level(&self) -> LogLevel {
        *self.log_level.read().await
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Attach the event subscriber, replacing the previous one
    pub async fn subscribe(&self) -> EventSubscription {
        self.events.subscribe().await
    }

    pub async fn unsubscribe(&self) {
        self.events.unsubscribe().await
    }

    // =========================================================================
    // Checkouts
    // =========================================================================

    /// Open a checkout in `pending` state
    #[instrument(skip(self, request), fields(currency = %request.currency))]
    pub async fn create_checkout(&self, request: CheckoutRequest) -> PaymentResult<Checkout> {
        let active = self.require_session().await?;

        let amount = Money::parse(request.amount, &request.currency)?;
        let email = request.customer_email.trim();
        if !is_valid_email(email) {
            return Err(PaymentError::invalid_argument(format!(
                "customerEmail is not a valid address: {:?}",
                request.customer_email
            )));
        }

        let checkout = Checkout::new(self.ids.next_checkout_id(), amount, email)
            .with_three_d_secure(request.three_d_secure);

        self.gateway
            .prepare_checkout(&active.session, &checkout)
            .await?;

        {
            let mut book = self.checkouts.lock().await;
            let entries = book.current(active.generation).ok_or_else(|| {
                debug!("Session ended while opening {}", checkout.checkout_id);
                cancelled(&checkout.checkout_id)
            })?;
            entries.insert(
                checkout.checkout_id.clone(),
                CheckoutEntry::new(checkout.clone()),
            );
        }

        info!(
            "Checkout ID generated: {} for {}",
            checkout.checkout_id,
            amount.display()
        );
        Ok(checkout)
    }

    /// Current status of a checkout
    pub async fn get_payment_status(&self, checkout_id: &str) -> PaymentResult<CheckoutStatus> {
        self.require_session().await?;
        let book = self.checkouts.lock().await;
        book.entries
            .get(checkout_id)
            .map(|entry| entry.checkout.status)
            .ok_or_else(|| PaymentError::not_found(checkout_id))
    }

    /// Snapshot of a checkout
    pub async fn checkout(&self, checkout_id: &str) -> PaymentResult<Checkout> {
        self.require_session().await?;
        let book = self.checkouts.lock().await;
        book.entries
            .get(checkout_id)
            .map(|entry| entry.checkout.clone())
            .ok_or_else(|| PaymentError::not_found(checkout_id))
    }

    /// The finalized attempt for a checkout, if it has one
    pub async fn payment_attempt(&self, checkout_id: &str) -> PaymentResult<Option<PaymentAttempt>> {
        self.require_session().await?;
        let book = self.checkouts.lock().await;
        book.entries
            .get(checkout_id)
            .map(|entry| entry.attempt.clone())
            .ok_or_else(|| PaymentError::not_found(checkout_id))
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Charge a card, running a 3-D Secure challenge when the policy asks for one
    #[instrument(skip(self, request), fields(checkout_id = %request.checkout_id))]
    pub async fn process_payment(&self, request: ProcessPaymentRequest) -> PaymentResult<PaymentReceipt> {
        let active = self.require_session().await?;
        request.card.validate()?;

        let checkout = self.claim(active.generation, &request.checkout_id).await?;
        if let Err(err) =
            ensure_amount_matches(&checkout, request.amount, request.currency.as_deref())
        {
            self.release(&checkout.checkout_id).await;
            return Err(err);
        }

        info!(
            "Processing payment: {} (3-D Secure enabled: {})",
            checkout.amount.display(),
            request.enable_3d_secure
        );

        let instrument = PaymentInstrument::CardFingerprint(request.card.fingerprint());

        let mut completion = None;
        if request.enable_3d_secure && self.challenge_policy.requires_challenge(&request.card) {
            match self.run_challenge(&active, &checkout).await {
                Ok(done) => completion = Some(done),
                Err(err) => {
                    return Err(self
                        .fail(active.generation, &checkout.checkout_id, instrument, err)
                        .await)
                }
            }
        }

        let authorization = self
            .gateway
            .authorize(AuthorizationRequest {
                session: &active.session,
                checkout: &checkout,
                instrument: &instrument,
                card: Some(&request.card),
                challenge: completion.as_ref(),
                three_d_secure_data: request
                    .three_d_secure_data
                    .as_ref()
                    .or(checkout.three_d_secure.as_ref()),
            })
            .await;

        self.settle(
            active.generation,
            &checkout,
            instrument,
            authorization,
            completion.as_ref(),
            ReceiptCard::for_card(&request.card, &active.session),
        )
        .await
    }

    /// Same as `process_payment`; the hosted UI is presented by the host
    pub async fn process_payment_with_ui(
        &self,
        request: ProcessPaymentRequest,
    ) -> PaymentResult<PaymentReceipt> {
        debug!("Hosted payment UI is rendered by the host");
        self.process_payment(request).await
    }

    /// Issue an opaque token for the card. No money moves and the checkout is untouched.
    #[instrument(skip(self, request), fields(checkout_id = %request.checkout_id))]
    pub async fn tokenize_payment_method(&self, request: TokenizeRequest) -> PaymentResult<String> {
        let active = self.require_session().await?;
        {
            let mut book = self.checkouts.lock().await;
            let entries = book
                .current(active.generation)
                .ok_or_else(|| cancelled(&request.checkout_id))?;
            if !entries.contains_key(&request.checkout_id) {
                return Err(PaymentError::not_found(&request.checkout_id));
            }
        }
        request.card.validate_for_tokenization()?;

        let token = issue_payment_token(active.session.access_token(), &request.checkout_id)?;
        info!("Payment method tokenized for {}", request.card.masked_number());
        Ok(token)
    }

    /// Charge a token issued for this checkout in this session. No card
    /// validation and no challenge.
    #[instrument(skip(self, request), fields(checkout_id = %request.checkout_id))]
    pub async fn process_payment_with_token(
        &self,
        request: TokenPaymentRequest,
    ) -> PaymentResult<PaymentReceipt> {
        let active = self.require_session().await?;
        if request.token.trim().is_empty() {
            return Err(PaymentError::invalid_argument("token is required"));
        }
        Money::parse(request.amount, &request.currency)?;
        verify_payment_token(
            active.session.access_token(),
            &request.checkout_id,
            &request.token,
        )?;

        let checkout = self.claim(active.generation, &request.checkout_id).await?;
        if let Err(err) =
            ensure_amount_matches(&checkout, Some(request.amount), Some(&request.currency))
        {
            self.release(&checkout.checkout_id).await;
            return Err(err);
        }

        info!("Processing token payment: {}", checkout.amount.display());

        let instrument = PaymentInstrument::Token(request.token.trim().to_string());
        let authorization = self
            .gateway
            .authorize(AuthorizationRequest {
                session: &active.session,
                checkout: &checkout,
                instrument: &instrument,
                card: None,
                challenge: None,
                three_d_secure_data: checkout.three_d_secure.as_ref(),
            })
            .await;

        self.settle(
            active.generation,
            &checkout,
            instrument,
            authorization,
            None,
            ReceiptCard::tokenized(),
        )
        .await
    }

    /// Resume an attempt suspended on its 3-D Secure challenge
    #[instrument(skip(self, completion))]
    pub async fn complete_challenge(
        &self,
        checkout_id: &str,
        completion: ChallengeCompletion,
    ) -> PaymentResult<()> {
        self.signal_challenge(checkout_id, ChallengeSignal::Completed(completion))
            .await?;
        info!("3-D Secure challenge completed");
        Ok(())
    }

    /// Abort an attempt suspended on its 3-D Secure challenge
    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, checkout_id: &str) -> PaymentResult<()> {
        self.signal_challenge(checkout_id, ChallengeSignal::Cancelled)
            .await?;
        info!("3-D Secure challenge cancelled");
        Ok(())
    }

    // =========================================================================
    // Settled payments
    // =========================================================================

    /// Look up a finalized payment of this session by its transaction id
    #[instrument(skip(self))]
    pub async fn verify_payment(&self, transaction_id: &str) -> PaymentResult<TransactionRecord> {
        self.require_session().await?;
        let mut book = self.checkouts.lock().await;
        book.by_transaction(transaction_id.trim())
            .and_then(|entry| entry.record())
            .ok_or_else(|| PaymentError::transaction_not_found(transaction_id))
    }

    /// Finalized attempts of this session, newest first
    pub async fn transaction_history(
        &self,
        request: TransactionHistoryRequest,
    ) -> PaymentResult<Vec<TransactionRecord>> {
        self.require_session().await?;
        if request.limit == 0 || request.limit > MAX_HISTORY_PAGE {
            return Err(PaymentError::invalid_argument(format!(
                "limit must be between 1 and {}, got {}",
                MAX_HISTORY_PAGE, request.limit
            )));
        }

        let mut records: Vec<TransactionRecord> = {
            let book = self.checkouts.lock().await;
            book.entries.values().filter_map(CheckoutEntry::record).collect()
        };
        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.checkout_id.cmp(&a.checkout_id))
        });

        debug!(
            "Transaction history: {} records, limit={}, offset={}",
            records.len(),
            request.limit,
            request.offset
        );
        Ok(records
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect())
    }

    /// Refund part or all of a completed payment. Without an amount the
    /// remaining balance is refunded; a full refund moves the checkout to
    /// `refunded`.
    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    pub async fn refund_payment(&self, request: RefundPaymentRequest) -> PaymentResult<RefundReceipt> {
        let active = self.require_session().await?;
        let transaction_id = request.transaction_id.trim();
        if transaction_id.is_empty() {
            return Err(PaymentError::invalid_argument("transactionId is required"));
        }
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        let (checkout, amount) = {
            let mut book = self.checkouts.lock().await;
            if book.generation != active.generation {
                return Err(PaymentError::transaction_not_found(transaction_id));
            }
            let entry = book
                .by_transaction(transaction_id)
                .ok_or_else(|| PaymentError::transaction_not_found(transaction_id))?;
            let checkout_id = entry.checkout.checkout_id.as_str();

            if entry.in_flight {
                return Err(PaymentError::invalid_state(
                    checkout_id,
                    "a refund is already in progress",
                ));
            }
            if entry.checkout.status != CheckoutStatus::Completed {
                return Err(PaymentError::invalid_state(
                    checkout_id,
                    format!("cannot refund a {} checkout", entry.checkout.status),
                ));
            }

            let charged = entry.checkout.amount;
            if let Some(code) = request.currency.as_deref() {
                let currency: Currency = code.parse()?;
                if currency != charged.currency {
                    return Err(PaymentError::invalid_argument(format!(
                        "currency {} does not match payment currency {}",
                        currency, charged.currency
                    )));
                }
            }
            let remaining = charged.amount - entry.refunded;
            let amount = match request.amount {
                Some(amount) => Money::from_decimal(amount, charged.currency)?,
                None => Money {
                    amount: remaining,
                    currency: charged.currency,
                },
            };
            if amount.amount > remaining {
                return Err(PaymentError::invalid_argument(format!(
                    "refund of {} exceeds the refundable {}",
                    amount.display(),
                    Money {
                        amount: remaining,
                        currency: charged.currency
                    }
                    .display()
                )));
            }

            entry.in_flight = true;
            (entry.checkout.clone(), amount)
        };

        info!("Processing refund: {} for {}", amount.display(), transaction_id);

        let refund_id = match self
            .gateway
            .refund(RefundRequest {
                session: &active.session,
                checkout: &checkout,
                transaction_id,
                amount,
                reason,
            })
            .await
        {
            Ok(reference) => reference.unwrap_or_else(|| self.ids.next_refund_id()),
            Err(err) => {
                warn!("Refund failed: {}", err);
                self.release(&checkout.checkout_id).await;
                return Err(err);
            }
        };

        let mut book = self.checkouts.lock().await;
        let entry = book
            .current(active.generation)
            .and_then(|entries| entries.get_mut(&checkout.checkout_id))
            .ok_or_else(|| cancelled(&checkout.checkout_id))?;
        entry.in_flight = false;
        entry.refunded += amount.amount;
        let remaining = checkout.amount.amount - entry.refunded;
        if remaining == 0 {
            entry.checkout.transition(CheckoutStatus::Refunded)?;
        }

        info!("Refund completed: {}", refund_id);
        Ok(RefundReceipt {
            refund_id,
            transaction_id: transaction_id.to_string(),
            checkout_id: checkout.checkout_id.clone(),
            amount: amount.as_decimal(),
            currency: amount.currency.to_string(),
            reason: reason.map(str::to_string),
            status: entry.checkout.status,
            remaining: amount.currency.from_minor_units(remaining),
            timestamp: Utc::now(),
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn require_session(&self) -> PaymentResult<ActiveSession> {
        let slot = self.session.read().await;
        let session = slot.clone().ok_or(PaymentError::NotInitialized)?;
        let generation = self.checkouts.lock().await.generation;
        Ok(ActiveSession {
            session,
            generation,
        })
    }

    /// Mark a pending checkout as having an attempt in flight
    async fn claim(&self, generation: u64, checkout_id: &str) -> PaymentResult<Checkout> {
        let mut book = self.checkouts.lock().await;
        let entry = book
            .current(generation)
            .ok_or_else(|| cancelled(checkout_id))?
            .get_mut(checkout_id)
            .ok_or_else(|| PaymentError::not_found(checkout_id))?;

        if entry.in_flight {
            return Err(PaymentError::invalid_state(
                checkout_id,
                "a payment is already in progress",
            ));
        }
        if entry.checkout.status != CheckoutStatus::Pending {
            return Err(PaymentError::invalid_state(
                checkout_id,
                format!("checkout is {}", entry.checkout.status),
            ));
        }

        entry.in_flight = true;
        Ok(entry.checkout.clone())
    }

    async fn release(&self, checkout_id: &str) {
        if let Some(entry) = self.checkouts.lock().await.entries.get_mut(checkout_id) {
            entry.in_flight = false;
        }
    }

    async fn signal_challenge(&self, checkout_id: &str, signal: ChallengeSignal) -> PaymentResult<()> {
        self.require_session().await?;
        let sender = {
            let mut book = self.checkouts.lock().await;
            let entry = book
                .entries
                .get_mut(checkout_id)
                .ok_or_else(|| PaymentError::not_found(checkout_id))?;
            entry.challenge.take().ok_or_else(|| {
                PaymentError::invalid_state(
                    checkout_id,
                    format!(
                        "no 3-D Secure challenge is awaiting completion (checkout is {})",
                        entry.checkout.status
                    ),
                )
            })?
        };
        sender.send(signal).map_err(|_| {
            PaymentError::invalid_state(checkout_id, "the challenge is no longer waiting")
        })
    }

    /// Open the challenge, announce it, and wait for the host's answer
    async fn run_challenge(
        &self,
        active: &ActiveSession,
        checkout: &Checkout,
    ) -> PaymentResult<ChallengeCompletion> {
        let checkout_id = checkout.checkout_id.as_str();
        let params = self
            .gateway
            .begin_challenge(&active.session, checkout)
            .await?;

        let (tx, rx) = oneshot::channel();
        {
            let mut book = self.checkouts.lock().await;
            let entry = book
                .current(active.generation)
                .and_then(|entries| entries.get_mut(checkout_id))
                .ok_or_else(|| cancelled(checkout_id))?;
            entry.checkout.transition(CheckoutStatus::ChallengeRequired)?;
            entry.challenge = Some(tx);

            info!("Triggering 3-D Secure challenge");
            self.events
                .emit(PaymentEvent::new(
                    EventType::ChallengeRequired,
                    checkout_id,
                    json!({
                        "acsUrl": params.acs_url,
                        "paReq": params.pa_req,
                        "md": params.md,
                    }),
                ))
                .await;
        }

        match tokio::time::timeout(self.config.challenge_timeout, rx).await {
            Ok(Ok(ChallengeSignal::Completed(completion))) => Ok(completion),
            Ok(Ok(ChallengeSignal::Cancelled)) | Ok(Err(_)) => Err(cancelled(checkout_id)),
            Err(_) => {
                warn!(
                    "3-D Secure challenge timed out after {:?}",
                    self.config.challenge_timeout
                );
                Err(PaymentError::declined("3-D Secure challenge timed out"))
            }
        }
    }

    /// Turn the gateway's answer into a receipt or a failure
    async fn settle(
        &self,
        generation: u64,
        checkout: &Checkout,
        instrument: PaymentInstrument,
        authorization: PaymentResult<Authorization>,
        completion: Option<&ChallengeCompletion>,
        card: ReceiptCard,
    ) -> PaymentResult<PaymentReceipt> {
        let checkout_id = checkout.checkout_id.as_str();

        let (transaction_id, three_d_secure) = match authorization {
            Ok(Authorization::Approved {
                transaction_id,
                three_d_secure,
            }) => (
                transaction_id.unwrap_or_else(|| self.ids.next_transaction_id()),
                three_d_secure.or_else(|| completion.map(resolve_three_d_secure)),
            ),
            Ok(Authorization::Declined { reason }) => {
                return Err(self
                    .fail(generation, checkout_id, instrument, PaymentError::declined(reason))
                    .await)
            }
            Err(err) => return Err(self.fail(generation, checkout_id, instrument, err).await),
        };

        let receipt = PaymentReceipt {
            checkout_id: checkout_id.to_string(),
            transaction_id: transaction_id.clone(),
            status: CheckoutStatus::Completed,
            amount: checkout.amount.as_decimal(),
            currency: checkout.amount.currency.to_string(),
            brand: card.brand,
            holder_name: card.holder_name,
            card_number: card.card_number,
            message: card.message.to_string(),
            timestamp: Utc::now(),
            three_d_secure_result: three_d_secure.clone(),
        };

        let data = serde_json::to_value(&receipt).unwrap_or_else(|e| {
            warn!("Failed to serialize receipt for event: {}", e);
            json!({ "checkoutId": checkout_id })
        });

        let recorded = self
            .finalize(
                generation,
                CheckoutStatus::Completed,
                PaymentAttempt {
                    checkout_id: checkout_id.to_string(),
                    instrument,
                    transaction_id: Some(transaction_id),
                    three_d_secure_result: three_d_secure,
                    outcome: AttemptOutcome::Succeeded,
                    created_at: Utc::now(),
                },
                PaymentEvent::new(EventType::PaymentSuccess, checkout_id, data),
            )
            .await;
        if !recorded {
            return Err(cancelled(checkout_id));
        }

        info!("Payment successful: {}", receipt.transaction_id);
        Ok(receipt)
    }

    /// Finalize a failed attempt, emit PAYMENT_FAILED and hand the error back
    async fn fail(
        &self,
        generation: u64,
        checkout_id: &str,
        instrument: PaymentInstrument,
        err: PaymentError,
    ) -> PaymentError {
        let reason = match &err {
            PaymentError::PaymentDeclined { reason } => reason.clone(),
            other => other.to_string(),
        };

        let recorded = self
            .finalize(
                generation,
                CheckoutStatus::Failed,
                PaymentAttempt {
                    checkout_id: checkout_id.to_string(),
                    instrument,
                    transaction_id: None,
                    three_d_secure_result: None,
                    outcome: AttemptOutcome::Failed {
                        reason: reason.clone(),
                    },
                    created_at: Utc::now(),
                },
                PaymentEvent::new(
                    EventType::PaymentFailed,
                    checkout_id,
                    json!({ "error": reason, "code": err.code() }),
                ),
            )
            .await;
        if !recorded {
            return cancelled(checkout_id);
        }

        warn!("Payment failed: {}", reason);
        err
    }

    /// Record the attempt and emit its terminal event, unless the session it
    /// ran under has ended. Returns whether anything was recorded.
    async fn finalize(
        &self,
        generation: u64,
        status: CheckoutStatus,
        attempt: PaymentAttempt,
        event: PaymentEvent,
    ) -> bool {
        let mut book = self.checkouts.lock().await;
        let Some(entry) = book
            .current(generation)
            .and_then(|entries| entries.get_mut(&attempt.checkout_id))
        else {
            debug!(
                "Checkout {} was discarded before its attempt settled",
                attempt.checkout_id
            );
            return false;
        };

        if let Err(e) = entry.checkout.transition(status) {
            warn!("Could not finalize checkout: {}", e);
        }
        entry.in_flight = false;
        entry.challenge = None;
        entry.attempt = Some(attempt);

        self.events.emit(event).await;
        true
    }
}

/// A host-supplied amount echo must match what the checkout was opened for
fn ensure_amount_matches(
    checkout: &Checkout,
    amount: Option<f64>,
    currency: Option<&str>,
) -> PaymentResult<()> {
    if let Some(code) = currency {
        let currency: Currency = code.parse()?;
        if currency != checkout.amount.currency {
            return Err(PaymentError::invalid_argument(format!(
                "currency {} does not match checkout currency {}",
                currency, checkout.amount.currency
            )));
        }
    }
    if let Some(amount) = amount {
        let requested = Money::from_decimal(amount, checkout.amount.currency)?;
        if requested.amount != checkout.amount.amount {
            return Err(PaymentError::invalid_argument(format!(
                "amount {} does not match checkout amount {}",
                requested.display(),
                checkout.amount.display()
            )));
        }
    }
    Ok(())
}
