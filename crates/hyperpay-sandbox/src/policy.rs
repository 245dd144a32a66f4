//! Seeded random approval.

use hyperpay_core::{AuthorizationRequest, SuccessPolicy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Approves a fixed fraction of authorizations at random
#[derive(Debug)]
pub struct RandomApproval {
    rate: f64,
    rng: Mutex<StdRng>,
}

impl RandomApproval {
    /// `rate` is clamped to `[0, 1]`; NaN approves nothing
    pub fn new(rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rate: if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) },
            rng: Mutex::new(rng),
        }
    }

    pub fn seeded(rate: f64, seed: u64) -> Self {
        Self::new(rate, Some(seed))
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl SuccessPolicy for RandomApproval {
    fn approve(&self, _request: &AuthorizationRequest<'_>) -> bool {
        // a poisoned rng is still a usable rng
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_bool(self.rate)
    }
}
