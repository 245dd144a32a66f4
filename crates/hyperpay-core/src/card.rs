//! # Card Details
//!
//! Card data as submitted by the host for a single payment.
//! The PAN and CVV only live inside `CardDetails`; everything that leaves a
//! payment operation carries a masked number or a fingerprint instead.

use crate::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Placeholder shown wherever a tokenized card stands in for a real one
pub const TOKENIZED_CARD_PLACEHOLDER: &str = "**** **** **** ****";

/// Raw card details for one payment attempt
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    /// Card brand as chosen by the host (VISA, MASTER, MADA, ...)
    #[serde(default)]
    pub brand: Option<String>,
    pub holder_name: String,
    pub card_number: String,
    #[serde(default)]
    pub expiry_month: String,
    #[serde(default)]
    pub expiry_year: String,
    #[serde(default)]
    pub cvv: String,
}

impl CardDetails {
    pub fn new(
        holder_name: impl Into<String>,
        card_number: impl Into<String>,
        expiry_month: impl Into<String>,
        expiry_year: impl Into<String>,
        cvv: impl Into<String>,
    ) -> Self {
        Self {
            brand: None,
            holder_name: holder_name.into(),
            card_number: card_number.into(),
            expiry_month: expiry_month.into(),
            expiry_year: expiry_year.into(),
            cvv: cvv.into(),
        }
    }

    /// Builder: set brand
    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    /// Card number with spaces and dashes removed
    pub fn normalized_number(&self) -> String {
        self.card_number
            .chars()
            .filter(|c| !matches!(c, ' ' | '-'))
            .collect()
    }

    /// Masked representation safe for receipts and events
    pub fn masked_number(&self) -> String {
        mask_card_number(&self.normalized_number())
    }

    /// Brand supplied by the host, or one guessed from the number prefix
    pub fn resolved_brand(&self) -> String {
        match self.brand.as_deref().map(str::trim) {
            Some(brand) if !brand.is_empty() => brand.to_ascii_uppercase(),
            _ => detect_brand(&self.normalized_number()).to_string(),
        }
    }

    /// SHA-256 of the normalized PAN, hex encoded
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.normalized_number().as_bytes());
        hex::encode(digest)
    }

    /// Minimal checks for a charge: holder, Luhn-valid number, expiry and CVV format
    pub fn validate(&self) -> PaymentResult<()> {
        self.validate_for_tokenization()?;

        if !luhn_valid(&self.normalized_number()) {
            return Err(PaymentError::invalid_argument("card number failed checksum"));
        }

        let month = self.expiry_month.trim();
        match month.parse::<u8>() {
            Ok(m) if (1..=12).contains(&m) && is_digits(month) => {}
            _ => {
                return Err(PaymentError::invalid_argument(
                    "expiry month must be between 01 and 12",
                ))
            }
        }

        let year = self.expiry_year.trim();
        if !is_digits(year) || !(year.len() == 2 || year.len() == 4) {
            return Err(PaymentError::invalid_argument(
                "expiry year must have 2 or 4 digits",
            ));
        }

        let cvv = self.cvv.trim();
        if !is_digits(cvv) || !(3..=4).contains(&cvv.len()) {
            return Err(PaymentError::invalid_argument("CVV must have 3 or 4 digits"));
        }

        Ok(())
    }

    /// Tokenization only needs a holder and a plausible number
    pub fn validate_for_tokenization(&self) -> PaymentResult<()> {
        if self.holder_name.trim().is_empty() {
            return Err(PaymentError::invalid_argument("holderName is required"));
        }
        let number = self.normalized_number();
        if number.is_empty() {
            return Err(PaymentError::invalid_argument("cardNumber is required"));
        }
        if !is_digits(&number) || !(12..=19).contains(&number.len()) {
            return Err(PaymentError::invalid_argument(
                "cardNumber must contain 12 to 19 digits",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("brand", &self.brand)
            .field("holder_name", &self.holder_name)
            .field("card_number", &self.masked_number())
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .field("cvv", &"***")
            .finish()
    }
}

/// Replace all but the last four characters with `*`.
/// Inputs shorter than four characters come back unchanged.
pub fn mask_card_number(card_number: &str) -> String {
    let len = card_number.chars().count();
    if len < 4 {
        return card_number.to_string();
    }
    let last_four: String = card_number.chars().skip(len - 4).collect();
    format!("{}{}", "*".repeat(len - 4), last_four)
}

/// Luhn checksum over an all-digit string
pub fn luhn_valid(number: &str) -> bool {
    if number.is_empty() || !is_digits(number) {
        return false;
    }
    let sum: u32 = number
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = (b - b'0') as u32;
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Best-effort brand detection from the IIN prefix
pub fn detect_brand(number: &str) -> &'static str {
    let prefix2: u32 = number.get(..2).and_then(|p| p.parse().ok()).unwrap_or(0);
    let prefix4: u32 = number.get(..4).and_then(|p| p.parse().ok()).unwrap_or(0);

    if number.starts_with('4') {
        "VISA"
    } else if (51..=55).contains(&prefix2) || (2221..=2720).contains(&prefix4) {
        "MASTER"
    } else if prefix2 == 34 || prefix2 == 37 {
        "AMEX"
    } else {
        "UNKNOWN"
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
