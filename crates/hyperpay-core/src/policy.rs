//! # Payment Policies
//!
//! Pluggable decisions the service and gateways consult instead of the
//! wall clock: whether a card gets a 3-D Secure challenge, and whether an
//! authorization is approved.

use crate::card::CardDetails;
use crate::gateway::AuthorizationRequest;
use std::sync::Arc;

/// Decides whether a card must go through a 3-D Secure challenge
pub trait ChallengePolicy: Send + Sync {
    fn requires_challenge(&self, card: &CardDetails) -> bool;
}

/// Decides whether an authorization is approved
pub trait SuccessPolicy: Send + Sync {
    fn approve(&self, request: &AuthorizationRequest<'_>) -> bool;
}

pub type BoxedChallengePolicy = Arc<dyn ChallengePolicy>;
pub type BoxedSuccessPolicy = Arc<dyn SuccessPolicy>;

/// Never challenge
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverChallenge;

impl ChallengePolicy for NeverChallenge {
    fn requires_challenge(&self, _card: &CardDetails) -> bool {
        false
    }
}

/// Challenge every card
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysChallenge;

impl ChallengePolicy for AlwaysChallenge {
    fn requires_challenge(&self, _card: &CardDetails) -> bool {
        true
    }
}

/// Challenge cards whose number starts with one of the configured prefixes
#[derive(Debug, Clone)]
pub struct CardPrefixChallenge {
    prefixes: Vec<String>,
}

impl CardPrefixChallenge {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for CardPrefixChallenge {
    /// `4000` test cards trigger a challenge
    fn default() -> Self {
        Self::new(["4000"])
    }
}

impl ChallengePolicy for CardPrefixChallenge {
    fn requires_challenge(&self, card: &CardDetails) -> bool {
        let number = card.normalized_number();
        self.prefixes
            .iter()
            .any(|p| !p.is_empty() && number.starts_with(p.as_str()))
    }
}

/// Fixed approve/decline decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDecision {
    approve: bool,
}

impl FixedDecision {
    pub fn approve_all() -> Self {
        Self { approve: true }
    }

    pub fn decline_all() -> Self {
        Self { approve: false }
    }
}

impl SuccessPolicy for FixedDecision {
    fn approve(&self, _request: &AuthorizationRequest<'_>) -> bool {
        self.approve
    }
}
