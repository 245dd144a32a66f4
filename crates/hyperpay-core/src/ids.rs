//! # Identifiers and Tokens
//!
//! Checkout ids combine a per-service monotonic counter with a random UUID,
//! so they never repeat within a session and cannot be guessed. Payment
//! tokens carry their own nonce and MAC, so they verify without server state.

use crate::error::{PaymentError, PaymentResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Generates checkout and transaction identifiers
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_checkout_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("CHK_{:08}_{}", seq, Uuid::new_v4().simple())
    }

    pub fn next_transaction_id(&self) -> String {
        format!("TXN_{}", Uuid::new_v4().simple())
    }

    pub fn next_refund_id(&self) -> String {
        format!("REF_{}", Uuid::new_v4().simple())
    }
}

const TOKEN_PREFIX: &str = "TOKEN_";
const NONCE_HEX_LEN: usize = 32;

fn token_mac(secret: &str, checkout_id: &str, nonce: &[u8]) -> PaymentResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Configuration(format!("token key rejected: {}", e)))?;
    mac.update(checkout_id.as_bytes());
    mac.update(b".");
    mac.update(nonce);
    Ok(mac)
}

/// Issue a payment token bound to a checkout.
///
/// `TOKEN_` + hex nonce + hex HMAC-SHA256, keyed by the session secret over
/// the checkout id and the nonce. No card data goes into the MAC.
pub fn issue_payment_token(secret: &str, checkout_id: &str) -> PaymentResult<String> {
    let nonce = Uuid::new_v4();
    let mac = token_mac(secret, checkout_id, nonce.as_bytes())?;
    Ok(format!(
        "{}{}{}",
        TOKEN_PREFIX,
        hex::encode(nonce.as_bytes()),
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check that `token` was issued for `checkout_id` under `secret`
pub fn verify_payment_token(secret: &str, checkout_id: &str, token: &str) -> PaymentResult<()> {
    let invalid = || PaymentError::invalid_argument("token was not issued for this checkout");

    let body = token.trim().strip_prefix(TOKEN_PREFIX).ok_or_else(invalid)?;
    if body.len() <= NONCE_HEX_LEN || !body.is_char_boundary(NONCE_HEX_LEN) {
        return Err(invalid());
    }
    let (nonce_hex, mac_hex) = body.split_at(NONCE_HEX_LEN);
    let nonce = hex::decode(nonce_hex).map_err(|_| invalid())?;
    let tag = hex::decode(mac_hex).map_err(|_| invalid())?;

    token_mac(secret, checkout_id, &nonce)?
        .verify_slice(&tag)
        .map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_checkout_ids_are_unique() {
        let ids = IdGenerator::new();
        let generated: HashSet<String> = (0..1000).map(|_| ids.next_checkout_id()).collect();
        assert_eq!(generated.len(), 1000);
    }

    #[test]
    fn test_checkout_ids_carry_sequence() {
        let ids = IdGenerator::new();
        assert!(ids.next_checkout_id().starts_with("CHK_00000001_"));
        assert!(ids.next_checkout_id().starts_with("CHK_00000002_"));
    }

    #[test]
    fn test_tokens_are_opaque_and_distinct() {
        let a = issue_payment_token("TOK1", "CHK_1").unwrap();
        let b = issue_payment_token("TOK1", "CHK_1").unwrap();
        assert!(a.starts_with("TOKEN_"));
        assert_eq!(a.len(), "TOKEN_".len() + 32 + 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_verification() {
        let token = issue_payment_token("TOK1", "CHK_1").unwrap();
        assert!(verify_payment_token("TOK1", "CHK_1", &token).is_ok());

        // other checkout, other session, tampered, foreign
        assert!(verify_payment_token("TOK1", "CHK_2", &token).is_err());
        assert!(verify_payment_token("TOK2", "CHK_1", &token).is_err());
        let mut tampered = token.clone();
        let last = if tampered.ends_with('0') { "1" } else { "0" };
        tampered.replace_range(tampered.len() - 1.., last);
        assert!(verify_payment_token("TOK1", "CHK_1", &tampered).is_err());
        assert!(verify_payment_token("TOK1", "CHK_1", "TOKEN_x").is_err());
        assert!(verify_payment_token("TOK1", "CHK_1", "TOKEN_ü").is_err());

        let err = verify_payment_token("TOK1", "CHK_1", "tok_123").unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }
}
