//! # Payment Events
//!
//! Push-channel events and the single-subscriber hub that delivers them.
//!
//! Delivery is fire-and-forget: there is at most one subscriber, a new
//! subscriber replaces the old one, and events sent while nobody listens
//! are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

/// Event types pushed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A 3-D Secure challenge must be presented
    #[serde(alias = "3DS_CHALLENGE")]
    ChallengeRequired,
    /// Payment completed
    PaymentSuccess,
    /// Payment failed, was declined or cancelled
    PaymentFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ChallengeRequired => "CHALLENGE_REQUIRED",
            EventType::PaymentSuccess => "PAYMENT_SUCCESS",
            EventType::PaymentFailed => "PAYMENT_FAILED",
        }
    }
}

/// An event on the push channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub checkout_id: String,
    pub data: serde_json::Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn new(event_type: EventType, checkout_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type,
            checkout_id: checkout_id.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Receiving end handed to the current subscriber
#[derive(Debug)]
pub struct EventSubscription {
    receiver: mpsc::UnboundedReceiver<PaymentEvent>,
}

impl EventSubscription {
    /// Wait for the next event. `None` once the subscription was replaced or detached.
    pub async fn recv(&mut self) -> Option<PaymentEvent> {
        self.receiver.recv().await
    }

    /// Take an event if one is already queued
    pub fn try_recv(&mut self) -> Option<PaymentEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything queued right now
    pub fn drain(&mut self) -> Vec<PaymentEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Unwrap into the raw channel receiver (for stream adapters)
    pub fn into_receiver(self) -> mpsc::UnboundedReceiver<PaymentEvent> {
        self.receiver
    }
}

/// Single-consumer event hub (last listener wins)
#[derive(Debug, Default)]
pub struct EventHub {
    sink: Mutex<Option<mpsc::UnboundedSender<PaymentEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber, detaching any previous one
    pub async fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.sink.lock().await.replace(tx);
        if previous.is_some() {
            debug!("Event subscriber replaced");
        } else {
            debug!("Event subscriber attached");
        }
        EventSubscription { receiver: rx }
    }

    /// Detach the current subscriber, if any
    pub async fn unsubscribe(&self) {
        if self.sink.lock().await.take().is_some() {
            debug!("Event subscriber detached");
        }
    }

    pub async fn has_subscriber(&self) -> bool {
        self.sink
            .lock()
            .await
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Deliver to the current subscriber, dropping the event if there is none
    pub async fn emit(&self, event: PaymentEvent) {
        let mut sink = self.sink.lock().await;
        match sink.as_ref() {
            Some(tx) => {
                trace!(
                    "Emitting {:?} for checkout {}",
                    event.event_type,
                    event.checkout_id
                );
                if tx.send(event).is_err() {
                    debug!("Event subscriber went away, dropping it");
                    *sink = None;
                }
            }
            None => trace!(
                "No subscriber, dropping {:?} for checkout {}",
                event.event_type,
                event.checkout_id
            ),
        }
    }
}
