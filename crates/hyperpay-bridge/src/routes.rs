//! # Routes
//!
//! Axum router configuration for the bridge.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - GET  /health - Health check
/// - GET  /api/v1/methods - List method names
/// - POST /api/v1/methods/{method} - Invoke a method, body = arguments
/// - GET  /api/v1/events - Server-sent payment events
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/methods", get(handlers::list_methods))
        .route("/methods/{method}", post(handlers::invoke_method))
        .route("/events", get(handlers::events));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
