//! # hyperpay-sandbox
//!
//! Simulated gateway for hyperpay-bridge-rs.
//!
//! - **SandboxGateway** - latency, seeded random approval, challenge parameters
//! - **SandboxConfig** - env (`HYPERPAY_SANDBOX_*`) or TOML configuration
//! - **spawn_auto_challenge** - answers 3-D Secure challenges for demos and tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hyperpay_sandbox::{spawn_auto_challenge, SandboxConfig, SandboxGateway};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let service = Arc::new(SandboxGateway::new(SandboxConfig::from_env()?).into_service());
//! let subscription = service.subscribe().await;
//! let mut responder = spawn_auto_challenge(service.clone(), subscription, Duration::from_secs(2));
//!
//! while let Some(event) = responder.events.recv().await {
//!     println!("{:?} {}", event.event_type, event.checkout_id);
//! }
//! ```

pub mod config;
pub mod gateway;
pub mod policy;
pub mod responder;

// Re-exports
pub use config::SandboxConfig;
pub use gateway::{SandboxGateway, SANDBOX_DECLINE_REASON};
pub use policy::RandomApproval;
pub use responder::{spawn_auto_challenge, AutoChallenge};
