//! # hyperpay-bridge
//!
//! HTTP transport for the payment-session service.
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/methods` | Method names |
//! | POST | `/api/v1/methods/{method}` | Invoke a method |
//! | GET | `/api/v1/events` | Payment events (SSE) |

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppState, BridgeConfig};
