//! # HyperPay Bridge
//!
//! Serves the payment-session service over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Optional tuning
//! export HYPERPAY_SANDBOX_APPROVAL_RATE=0.9
//! export HYPERPAY_AUTO_CHALLENGE_MS=2000
//! export LOG_FORMAT=json
//!
//! # Run the server
//! hyperpay-bridge
//! ```

use hyperpay_bridge::{routes, state::AppState};
use hyperpay_core::{LogLevel, LogLevelHook};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; the filter stays reloadable for setLogLevel
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::builder()
            .with_default_directive(Level::INFO.into())
            .from_env_lossy(),
    );
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();

    let log_hook: LogLevelHook = Arc::new(move |level: LogLevel| {
        let directive = level.as_filter_directive();
        if let Err(e) = filter_handle.modify(|filter| *filter = EnvFilter::new(directive)) {
            tracing::error!("Failed to apply log level {}: {}", directive, e);
        }
    });

    print_banner();

    let state = AppState::new(Some(log_hook))?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Payment provider: {}", state.service().provider_name());
    if let Some(delay) = state.config.auto_challenge {
        info!("Auto-completing 3-D Secure challenges after {:?}", delay);
    }

    let app = routes::create_router(state);

    info!("HyperPay bridge starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Methods: POST http://{}/api/v1/methods/{{method}}", addr);
        info!("Events: GET http://{}/api/v1/events", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  HyperPay Bridge
  ━━━━━━━━━━━━━━━━━━━━━━━
  Payment-session sandbox
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
