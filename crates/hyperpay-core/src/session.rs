//! # Merchant Session
//!
//! Credentials stored by `initialize` and the log levels accepted by
//! `setLogLevel`.

use crate::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Arguments of `initialize`
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub is_production: bool,
    #[serde(default)]
    pub brand: Option<String>,
    /// Free-form SDK configuration passed through from the host
    #[serde(default, alias = "configuration")]
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
}

impl InitializeRequest {
    pub fn new(merchant_id: impl Into<String>, access_token: impl Into<String>, is_production: bool) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            access_token: access_token.into(),
            is_production,
            brand: None,
            options: None,
        }
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }
}

impl std::fmt::Debug for InitializeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializeRequest")
            .field("merchant_id", &self.merchant_id)
            .field("access_token", &"<redacted>")
            .field("is_production", &self.is_production)
            .field("brand", &self.brand)
            .finish()
    }
}

/// The active merchant session. One per service instance.
#[derive(Clone)]
pub struct Session {
    pub merchant_id: String,
    access_token: String,
    pub is_production: bool,
    pub brand: Option<String>,
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    /// Validate the request and build a session from it
    pub fn from_request(request: InitializeRequest) -> PaymentResult<Self> {
        let merchant_id = request.merchant_id.trim();
        if merchant_id.is_empty() {
            return Err(PaymentError::invalid_argument("merchantId is required"));
        }
        let access_token = request.access_token.trim();
        if access_token.is_empty() {
            return Err(PaymentError::invalid_argument("accessToken is required"));
        }

        Ok(Self {
            merchant_id: merchant_id.to_string(),
            access_token: access_token.to_string(),
            is_production: request.is_production,
            brand: request.brand.filter(|b| !b.trim().is_empty()),
            options: request.options.unwrap_or_default(),
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn environment(&self) -> &'static str {
        if self.is_production {
            "live"
        } else {
            "test"
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("merchant_id", &self.merchant_id)
            .field("access_token", &"<redacted>")
            .field("is_production", &self.is_production)
            .field("brand", &self.brand)
            .finish()
    }
}

/// Log levels accepted from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl FromStr for LogLevel {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(PaymentError::invalid_argument(format!(
                "unknown log level: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
