//! # Method Dispatch
//!
//! The request/response half of the host protocol. A transport hands over a
//! method name and JSON arguments; the dispatcher looks the name up in a
//! static table, decodes typed arguments, calls the service and encodes the
//! result. Every platform adapter shares this one implementation.

use crate::checkout::CheckoutRequest;
use crate::error::{PaymentError, PaymentResult};
use crate::request::{
    CheckoutIdRequest, CompleteChallengeRequest, ProcessPaymentRequest, RefundPaymentRequest,
    SetLogLevelRequest, TokenPaymentRequest, TokenizeRequest, TransactionHistoryRequest,
    VerifyPaymentRequest,
};
use crate::service::PaymentSessionService;
use crate::session::InitializeRequest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Operations reachable from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Initialize,
    CreateCheckout,
    ProcessPayment,
    ProcessPaymentWithUi,
    GetPaymentStatus,
    TokenizePaymentMethod,
    ProcessPaymentWithToken,
    CompleteChallenge,
    CancelPayment,
    VerifyPayment,
    GetTransactionHistory,
    RefundPayment,
    GetSdkVersion,
    IsInitialized,
    SetLogLevel,
    Dispose,
}

/// Wire name → method. The first entry for a method is its canonical name.
const METHODS: &[(&str, Method)] = &[
    ("initialize", Method::Initialize),
    ("createCheckout", Method::CreateCheckout),
    ("getCheckoutId", Method::CreateCheckout),
    ("processPayment", Method::ProcessPayment),
    ("processPaymentWithUI", Method::ProcessPaymentWithUi),
    ("getPaymentStatus", Method::GetPaymentStatus),
    ("tokenizePaymentMethod", Method::TokenizePaymentMethod),
    ("processPaymentWithToken", Method::ProcessPaymentWithToken),
    ("completeChallenge", Method::CompleteChallenge),
    ("cancelPayment", Method::CancelPayment),
    ("verifyPayment", Method::VerifyPayment),
    ("getTransactionHistory", Method::GetTransactionHistory),
    ("refundPayment", Method::RefundPayment),
    ("getSDKVersion", Method::GetSdkVersion),
    ("isInitialized", Method::IsInitialized),
    ("setLogLevel", Method::SetLogLevel),
    ("dispose", Method::Dispose),
];

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        METHODS
            .iter()
            .find(|(wire, _)| *wire == name)
            .map(|(_, method)| *method)
    }

    pub fn name(&self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, method)| method == self)
            .map(|(wire, _)| *wire)
            .unwrap_or("unknown")
    }

    /// Canonical names of every method
    pub fn names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for (wire, method) in METHODS {
            if method.name() == *wire {
                names.push(*wire);
            }
        }
        names
    }
}

/// Structured failure returned to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// HTTP-style status for transports that need one
    #[serde(skip)]
    pub status: u16,
}

impl MethodError {
    pub fn not_implemented(method: &str) -> Self {
        Self {
            code: "NOT_IMPLEMENTED".to_string(),
            message: format!("Method not implemented: {}", method),
            details: None,
            status: 501,
        }
    }
}

impl From<PaymentError> for MethodError {
    fn from(err: PaymentError) -> Self {
        let details = match &err {
            PaymentError::NotFound { checkout_id }
            | PaymentError::InvalidState { checkout_id, .. }
            | PaymentError::PaymentCancelled { checkout_id } => {
                Some(json!({ "checkoutId": checkout_id }))
            }
            PaymentError::TransactionNotFound { transaction_id } => {
                Some(json!({ "transactionId": transaction_id }))
            }
            _ => None,
        }
        .map(|mut d| {
            d["retryable"] = json!(err.is_retryable());
            d
        })
        .or_else(|| err.is_retryable().then(|| json!({ "retryable": true })));

        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details,
            status: err.status_code(),
        }
    }
}

impl std::fmt::Display for MethodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for MethodError {}

/// Routes method calls to a shared service
#[derive(Clone)]
pub struct MethodDispatcher {
    service: Arc<PaymentSessionService>,
}

impl MethodDispatcher {
    pub fn new(service: Arc<PaymentSessionService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<PaymentSessionService> {
        &self.service
    }

    /// Run `method` with JSON `arguments`
    #[instrument(skip(self, arguments))]
    pub async fn dispatch(&self, method: &str, arguments: Value) -> Result<Value, MethodError> {
        let Some(resolved) = Method::from_name(method) else {
            warn!("Unknown method: {}", method);
            return Err(MethodError::not_implemented(method));
        };

        debug!("Dispatching {}", resolved.name());
        self.invoke(resolved, arguments).await.map_err(|err| {
            debug!("{} failed: {}", resolved.name(), err);
            MethodError::from(err)
        })
    }

    async fn invoke(&self, method: Method, arguments: Value) -> PaymentResult<Value> {
        let service = &self.service;
        match method {
            Method::Initialize => {
                service.initialize(decode::<InitializeRequest>(arguments)?).await?;
                Ok(json!({ "success": true }))
            }
            Method::CreateCheckout => {
                let checkout = service
                    .create_checkout(decode::<CheckoutRequest>(arguments)?)
                    .await?;
                Ok(json!({
                    "checkoutId": checkout.checkout_id,
                    "status": checkout.status,
                }))
            }
            Method::ProcessPayment => {
                let receipt = service
                    .process_payment(decode::<ProcessPaymentRequest>(arguments)?)
                    .await?;
                encode(&receipt)
            }
            Method::ProcessPaymentWithUi => {
                let receipt = service
                    .process_payment_with_ui(decode::<ProcessPaymentRequest>(arguments)?)
                    .await?;
                encode(&receipt)
            }
            Method::GetPaymentStatus => {
                let request = decode::<CheckoutIdRequest>(arguments)?;
                let status = service.get_payment_status(&request.checkout_id).await?;
                Ok(json!({ "status": status }))
            }
            Method::TokenizePaymentMethod => {
                let token = service
                    .tokenize_payment_method(decode::<TokenizeRequest>(arguments)?)
                    .await?;
                Ok(json!({ "token": token }))
            }
            Method::ProcessPaymentWithToken => {
                let receipt = service
                    .process_payment_with_token(decode::<TokenPaymentRequest>(arguments)?)
                    .await?;
                encode(&receipt)
            }
            Method::CompleteChallenge => {
                let request = decode::<CompleteChallengeRequest>(arguments)?;
                service
                    .complete_challenge(&request.checkout_id, request.completion)
                    .await?;
                Ok(Value::Null)
            }
            Method::CancelPayment => {
                let request = decode::<CheckoutIdRequest>(arguments)?;
                service.cancel_payment(&request.checkout_id).await?;
                Ok(Value::Null)
            }
            Method::VerifyPayment => {
                let request = decode::<VerifyPaymentRequest>(arguments)?;
                let record = service.verify_payment(&request.transaction_id).await?;
                encode(&record)
            }
            Method::GetTransactionHistory => {
                let transactions = service
                    .transaction_history(decode::<TransactionHistoryRequest>(arguments)?)
                    .await?;
                Ok(json!({ "transactions": encode(&transactions)? }))
            }
            Method::RefundPayment => {
                let receipt = service
                    .refund_payment(decode::<RefundPaymentRequest>(arguments)?)
                    .await?;
                encode(&receipt)
            }
            Method::GetSdkVersion => Ok(json!({ "version": service.sdk_version() })),
            Method::IsInitialized => Ok(json!({ "initialized": service.is_initialized().await })),
            Method::SetLogLevel => {
                let request = decode::<SetLogLevelRequest>(arguments)?;
                service.set_log_level(&request.level).await?;
                Ok(Value::Null)
            }
            Method::Dispose => {
                service.dispose().await;
                Ok(Value::Null)
            }
        }
    }
}

fn decode<T: DeserializeOwned>(arguments: Value) -> PaymentResult<T> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| PaymentError::invalid_argument(format!("invalid arguments: {}", e)))
}

fn encode<T: Serialize>(value: &T) -> PaymentResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| PaymentError::TransportFailure(format!("failed to encode result: {}", e)))
}
