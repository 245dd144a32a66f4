//! Auto-challenge responder.
//!
//! Plays the part of a cardholder who always passes 3-D Secure: every
//! `CHALLENGE_REQUIRED` event is answered with `complete_challenge` after a
//! delay. All events are forwarded unchanged so the host still sees them.
//! The responder stops as soon as the forwarded stream is dropped.

use hyperpay_core::{
    ChallengeCompletion, EventSubscription, EventType, PaymentEvent, PaymentSessionService,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle to a running responder
pub struct AutoChallenge {
    /// Every event seen on the subscription, in order
    pub events: mpsc::UnboundedReceiver<PaymentEvent>,
    handle: JoinHandle<()>,
}

impl AutoChallenge {
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// True once the subscription or the forwarded stream has closed
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Answer every challenge on `subscription` after `delay`
pub fn spawn_auto_challenge(
    service: Arc<PaymentSessionService>,
    subscription: EventSubscription,
    delay: Duration,
) -> AutoChallenge {
    let (tx, events) = mpsc::unbounded_channel();
    let mut receiver = subscription.into_receiver();

    let handle = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = tx.closed() => {
                    debug!("Event listener went away");
                    break;
                }
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if tx.is_closed() {
                break;
            }

            if event.event_type == EventType::ChallengeRequired {
                let service = service.clone();
                let checkout_id = event.checkout_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    match service
                        .complete_challenge(&checkout_id, ChallengeCompletion::default())
                        .await
                    {
                        Ok(()) => debug!("Auto-completed challenge for {}", checkout_id),
                        Err(e) => warn!("Auto-completion for {} skipped: {}", checkout_id, e),
                    }
                });
            }
            if tx.send(event).is_err() {
                break;
            }
        }
        debug!("Auto-challenge responder stopped");
    });

    AutoChallenge { events, handle }
}
