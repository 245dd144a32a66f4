//! # Request Handlers
//!
//! The method channel takes a method name in the path and its arguments as
//! the JSON body; the event channel streams payment events as server-sent
//! events.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use hyperpay_core::{Method, MethodError, PaymentEvent};
use hyperpay_sandbox::spawn_auto_challenge;
use serde_json::Value;
use std::convert::Infallible;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, instrument, warn};

fn method_error_response(err: MethodError) -> Response {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let service = state.service();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "hyperpay-bridge",
        "version": service.sdk_version(),
        "provider": service.provider_name(),
        "initialized": service.is_initialized().await,
    }))
}

/// Canonical names of the methods the bridge accepts
pub async fn list_methods() -> impl IntoResponse {
    Json(Method::names())
}

/// Invoke a method; the body is its arguments
#[instrument(skip(state, body))]
pub async fn invoke_method(
    State(state): State<AppState>,
    Path(method): Path<String>,
    body: Bytes,
) -> Response {
    let arguments = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => value,
            Err(e) => {
                warn!("Rejecting malformed arguments: {}", e);
                return method_error_response(MethodError {
                    code: "INVALID_ARGUMENT".to_string(),
                    message: format!("Invalid argument: body is not JSON: {}", e),
                    details: None,
                    status: 400,
                });
            }
        }
    };

    match state.dispatcher.dispatch(&method, arguments).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => method_error_response(err),
    }
}

/// Stream payment events. Connecting replaces the previous listener.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let service = state.service().clone();
    let subscription = service.subscribe().await;

    let receiver = match state.config.auto_challenge {
        Some(delay) => {
            info!("Event listener attached, auto-completing challenges after {:?}", delay);
            spawn_auto_challenge(service, subscription, delay).events
        }
        None => {
            info!("Event listener attached");
            subscription.into_receiver()
        }
    };

    let stream = UnboundedReceiverStream::new(receiver)
        .map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &PaymentEvent) -> Event {
    match Event::default().event(event.event_type.as_str()).json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.event_type.as_str(), e);
            Event::default().comment("event dropped")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_error_status() {
        let response = method_error_response(MethodError::not_implemented("chargeback"));
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

        let response = method_error_response(MethodError {
            code: "ODD".to_string(),
            message: "odd".to_string(),
            details: None,
            status: 42,
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
