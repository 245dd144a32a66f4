//! # hyperpay-core
//!
//! Payment-session protocol and event model behind the HyperPay mobile bridge.
//!
//! This crate provides:
//! - `PaymentSessionService` owning the merchant session and checkout lifecycle
//! - `PaymentGateway` trait for whatever authorizes payments
//! - `ChallengePolicy` / `SuccessPolicy` for deterministic, injectable decisions
//! - `EventHub` and `PaymentEvent` for the push channel
//! - `MethodDispatcher` mapping host method names to service operations
//! - `PaymentError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use hyperpay_core::{
//!     CardDetails, CheckoutRequest, FixedDecision, InitializeRequest, PaymentSessionService,
//!     PolicyGateway, ProcessPaymentRequest,
//! };
//! use std::sync::Arc;
//!
//! let gateway = PolicyGateway::new(Arc::new(FixedDecision::approve_all()));
//! let service = PaymentSessionService::new(Arc::new(gateway));
//!
//! service.initialize(InitializeRequest::new("M1", "TOK1", false)).await?;
//! let checkout = service.create_checkout(CheckoutRequest::new(100.0, "SAR", "a@b.com")).await?;
//!
//! let card = CardDetails::new("Jane Doe", "4111111111111111", "12", "2030", "123");
//! let receipt = service
//!     .process_payment(ProcessPaymentRequest::new(&checkout.checkout_id, card))
//!     .await?;
//! ```

pub mod card;
pub mod checkout;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod gateway;
pub mod ids;
pub mod money;
pub mod policy;
pub mod request;
pub mod service;
pub mod session;

// Re-exports for convenience
pub use card::{mask_card_number, CardDetails, TOKENIZED_CARD_PLACEHOLDER};
pub use checkout::{
    AttemptOutcome, ChallengeCompletion, ChallengeParameters, Checkout, CheckoutRequest,
    CheckoutStatus, PaymentAttempt, PaymentInstrument, PaymentReceipt, RefundReceipt,
    ThreeDSecureResult, TransactionRecord,
};
pub use dispatch::{Method, MethodDispatcher, MethodError};
pub use error::{PaymentError, PaymentResult};
pub use event::{EventHub, EventSubscription, EventType, PaymentEvent};
pub use gateway::{
    Authorization, AuthorizationRequest, BoxedPaymentGateway, PaymentGateway, PolicyGateway,
    RefundRequest,
};
pub use money::{Currency, Money};
pub use policy::{
    AlwaysChallenge, BoxedChallengePolicy, BoxedSuccessPolicy, CardPrefixChallenge,
    ChallengePolicy, FixedDecision, NeverChallenge, SuccessPolicy,
};
pub use request::{
    CheckoutIdRequest, CompleteChallengeRequest, ProcessPaymentRequest, RefundPaymentRequest,
    SetLogLevelRequest, TokenPaymentRequest, TokenizeRequest, TransactionHistoryRequest,
    VerifyPaymentRequest,
};
pub use service::{
    LogLevelHook, PaymentSessionService, ServiceConfig, MAX_HISTORY_PAGE, SDK_VERSION,
};
pub use session::{InitializeRequest, LogLevel, Session};
