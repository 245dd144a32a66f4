//! # Payment Error Types
//!
//! Typed error handling for the payment-session core.
//! All service operations return `Result<T, PaymentError>`.

use thiserror::Error;

/// Core error type for all payment-session operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// A payment-affecting call was made before `initialize`
    #[error("SDK not initialized")]
    NotInitialized,

    /// Missing or malformed required field
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown checkout id
    #[error("Checkout not found: {checkout_id}")]
    NotFound { checkout_id: String },

    /// Unknown transaction id
    #[error("Transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: String },

    /// Operation on a terminal or mismatched checkout
    #[error("Invalid state for checkout {checkout_id}: {message}")]
    InvalidState {
        checkout_id: String,
        message: String,
    },

    /// Payment was declined by the gateway or policy
    #[error("Payment declined: {reason}")]
    PaymentDeclined { reason: String },

    /// A suspended 3-D Secure challenge was aborted
    #[error("Payment cancelled for checkout {checkout_id}")]
    PaymentCancelled { checkout_id: String },

    /// Gateway or other collaborator unreachable
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Configuration errors (bad env values, unreadable config files)
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PaymentError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        PaymentError::InvalidArgument(message.into())
    }

    pub fn not_found(checkout_id: impl Into<String>) -> Self {
        PaymentError::NotFound {
            checkout_id: checkout_id.into(),
        }
    }

    pub fn transaction_not_found(transaction_id: impl Into<String>) -> Self {
        PaymentError::TransactionNotFound {
            transaction_id: transaction_id.into(),
        }
    }

    pub fn invalid_state(checkout_id: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::InvalidState {
            checkout_id: checkout_id.into(),
            message: message.into(),
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        PaymentError::PaymentDeclined {
            reason: reason.into(),
        }
    }

    /// Returns true if the caller may retry with a fresh checkout
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::PaymentDeclined { .. } | PaymentError::TransportFailure(_)
        )
    }

    /// Wire error code reported to the host application
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::NotInitialized => "NOT_INITIALIZED",
            PaymentError::InvalidArgument(_) => "INVALID_ARGUMENT",
            PaymentError::NotFound { .. } | PaymentError::TransactionNotFound { .. } => "NOT_FOUND",
            PaymentError::InvalidState { .. } => "INVALID_STATE",
            PaymentError::PaymentDeclined { .. } => "PAYMENT_DECLINED",
            PaymentError::PaymentCancelled { .. } => "PAYMENT_CANCELLED",
            PaymentError::TransportFailure(_) => "TRANSPORT_FAILURE",
            PaymentError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::NotInitialized => 412,
            PaymentError::InvalidArgument(_) => 400,
            PaymentError::NotFound { .. } | PaymentError::TransactionNotFound { .. } => 404,
            PaymentError::InvalidState { .. } => 409,
            PaymentError::PaymentDeclined { .. } => 402,
            PaymentError::PaymentCancelled { .. } => 409,
            PaymentError::TransportFailure(_) => 503,
            PaymentError::Configuration(_) => 500,
        }
    }
}

/// Result type alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
