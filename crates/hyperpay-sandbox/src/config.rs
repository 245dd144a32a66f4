//! # Sandbox Configuration
//!
//! Tuning for the simulated gateway. Loaded from `HYPERPAY_SANDBOX_*`
//! environment variables (a `.env` file is honoured) or from a TOML table.

use hyperpay_core::PaymentError;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_ACS_URL: &str = "https://acs.sandbox.hyperpay.test/challenge";

/// Sandbox gateway configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Simulated network latency per gateway call, in milliseconds
    pub latency_ms: u64,

    /// Probability in `[0, 1]` that an authorization is approved
    pub approval_rate: f64,

    /// Seed for the approval RNG. Unseeded configs draw from OS entropy.
    pub seed: Option<u64>,

    /// ACS URL handed out in challenge parameters
    pub acs_url: String,

    /// Card number prefixes that trigger a 3-D Secure challenge
    pub challenge_prefixes: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            approval_rate: 2.0 / 3.0,
            seed: None,
            acs_url: DEFAULT_ACS_URL.to_string(),
            challenge_prefixes: vec!["4000".to_string()],
        }
    }
}

impl SandboxConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional env vars:
    /// - `HYPERPAY_SANDBOX_LATENCY_MS`
    /// - `HYPERPAY_SANDBOX_APPROVAL_RATE`
    /// - `HYPERPAY_SANDBOX_SEED`
    /// - `HYPERPAY_SANDBOX_ACS_URL`
    /// - `HYPERPAY_SANDBOX_CHALLENGE_PREFIXES` (comma separated)
    pub fn from_env() -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PaymentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(latency) = parse_var(&lookup, "HYPERPAY_SANDBOX_LATENCY_MS")? {
            config.latency_ms = latency;
        }
        if let Some(rate) = parse_var(&lookup, "HYPERPAY_SANDBOX_APPROVAL_RATE")? {
            config.approval_rate = rate;
        }
        if let Some(seed) = parse_var(&lookup, "HYPERPAY_SANDBOX_SEED")? {
            config.seed = Some(seed);
        }
        if let Some(url) = lookup("HYPERPAY_SANDBOX_ACS_URL") {
            config.acs_url = url.trim().to_string();
        }
        if let Some(prefixes) = lookup("HYPERPAY_SANDBOX_CHALLENGE_PREFIXES") {
            config.challenge_prefixes = prefixes
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document whose keys are the field names
    pub fn from_toml_str(source: &str) -> Result<Self, PaymentError> {
        let config: Self = toml::from_str(source)
            .map_err(|e| PaymentError::Configuration(format!("invalid sandbox config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PaymentError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            PaymentError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), PaymentError> {
        if !(0.0..=1.0).contains(&self.approval_rate) {
            return Err(PaymentError::Configuration(format!(
                "approval_rate must be between 0 and 1, got {}",
                self.approval_rate
            )));
        }
        if !self.acs_url.starts_with("https://") && !self.acs_url.starts_with("http://") {
            return Err(PaymentError::Configuration(
                "acs_url must be an http(s) URL".to_string(),
            ));
        }
        Ok(())
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Builder: set simulated latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    /// Builder: set approval probability
    pub fn with_approval_rate(mut self, rate: f64) -> Self {
        self.approval_rate = rate;
        self
    }

    /// Builder: make approval decisions reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builder: set the ACS URL
    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.acs_url = url.into();
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, PaymentError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PaymentError::Configuration(format!("{} has an invalid value: {}", key, raw))),
    }
}
