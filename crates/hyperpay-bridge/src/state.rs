//! # Application State
//!
//! Shared state for the Axum application: the method dispatcher wrapping the
//! payment-session service, and the bridge configuration.

use hyperpay_core::{LogLevelHook, MethodDispatcher, PaymentSessionService};
use hyperpay_sandbox::{SandboxConfig, SandboxGateway};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Answer 3-D Secure challenges automatically after this delay
    pub auto_challenge: Option<Duration>,
}

impl BridgeConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            auto_challenge: lookup("HYPERPAY_AUTO_CHALLENGE_MS")
                .and_then(|ms| ms.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid socket address {}:{}: {}", self.host, self.port, e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "development".to_string(),
            auto_challenge: None,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Routes method calls to the payment-session service
    pub dispatcher: MethodDispatcher,
    /// Bridge config
    pub config: BridgeConfig,
}

impl AppState {
    /// Build state backed by the sandbox gateway, forwarding `setLogLevel` to `log_hook`
    pub fn new(log_hook: Option<LogLevelHook>) -> anyhow::Result<Self> {
        let config = BridgeConfig::from_env();
        let sandbox = load_sandbox_config()?;

        let mut service = SandboxGateway::new(sandbox).into_service();
        if let Some(hook) = log_hook {
            service = service.with_log_level_hook(hook);
        }

        Ok(Self::with_service(Arc::new(service), config))
    }

    /// Build state around an existing service
    pub fn with_service(service: Arc<PaymentSessionService>, config: BridgeConfig) -> Self {
        Self {
            dispatcher: MethodDispatcher::new(service),
            config,
        }
    }

    pub fn service(&self) -> &Arc<PaymentSessionService> {
        self.dispatcher.service()
    }
}

/// Load sandbox settings from config/sandbox.toml, falling back to the environment
fn load_sandbox_config() -> anyhow::Result<SandboxConfig> {
    let config_paths = [
        "config/sandbox.toml",
        "../config/sandbox.toml",
        "../../config/sandbox.toml",
    ];

    for path in config_paths {
        if std::path::Path::new(path).exists() {
            let config = SandboxConfig::from_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path, e))?;
            tracing::info!("Loaded sandbox config from {}", path);
            return Ok(config);
        }
    }

    tracing::info!("No sandbox config file found, using environment");
    SandboxConfig::from_env().map_err(|e| anyhow::anyhow!("Invalid sandbox config: {}", e))
}
