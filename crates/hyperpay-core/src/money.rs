//! # Money Types
//!
//! Currencies and amounts for checkout sessions.
//! Hosts send decimal amounts; everything downstream works in minor units.

use crate::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Largest amount accepted, in minor units. Every integer up to 2^53 is exact
/// as an `f64`, so decimal amounts in range round-trip without loss.
pub const MAX_MINOR_UNITS: i64 = 1 << 53;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    SAR,
    AED,
    KWD,
    BHD,
    OMR,
    QAR,
    EGP,
    JOD,
    USD,
    EUR,
    GBP,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::SAR => "SAR",
            Currency::AED => "AED",
            Currency::KWD => "KWD",
            Currency::BHD => "BHD",
            Currency::OMR => "OMR",
            Currency::QAR => "QAR",
            Currency::EGP => "EGP",
            Currency::JOD => "JOD",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
        }
    }

    /// Returns the number of decimal places for this currency
    /// (the dinars and the Omani rial use 3, the rest 2)
    pub fn decimal_places(&self) -> u8 {
        match self {
            Currency::KWD | Currency::BHD | Currency::OMR | Currency::JOD => 3,
            _ => 2,
        }
    }

    /// Convert a decimal amount to the smallest currency unit.
    /// `None` when the result would exceed `MAX_MINOR_UNITS`.
    pub fn to_minor_units(&self, amount: f64) -> Option<i64> {
        let multiplier = 10_f64.powi(self.decimal_places() as i32);
        let scaled = (amount * multiplier).round();
        if !scaled.is_finite() || scaled.abs() > MAX_MINOR_UNITS as f64 {
            return None;
        }
        Some(scaled as i64)
    }

    /// Convert from smallest unit back to decimal
    pub fn from_minor_units(&self, amount: i64) -> f64 {
        let divisor = 10_f64.powi(self.decimal_places() as i32);
        amount as f64 / divisor
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.len() != 3 {
            return Err(PaymentError::invalid_argument(format!(
                "currency must be a 3-letter ISO 4217 code, got {:?}",
                s
            )));
        }
        match code.to_ascii_uppercase().as_str() {
            "SAR" => Ok(Currency::SAR),
            "AED" => Ok(Currency::AED),
            "KWD" => Ok(Currency::KWD),
            "BHD" => Ok(Currency::BHD),
            "OMR" => Ok(Currency::OMR),
            "QAR" => Ok(Currency::QAR),
            "EGP" => Ok(Currency::EGP),
            "JOD" => Ok(Currency::JOD),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            other => Err(PaymentError::invalid_argument(format!(
                "unsupported currency: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount in the smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units (halalas for SAR, fils for KWD)
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Money {
    /// Build from the host's decimal amount. Rejects non-finite and non-positive values.
    pub fn from_decimal(amount: f64, currency: Currency) -> PaymentResult<Self> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(PaymentError::invalid_argument(format!(
                "amount must be greater than zero, got {}",
                amount
            )));
        }
        let minor = currency.to_minor_units(amount).ok_or_else(|| {
            PaymentError::invalid_argument(format!(
                "amount {} exceeds the largest supported {} amount",
                amount, currency
            ))
        })?;
        if minor <= 0 {
            return Err(PaymentError::invalid_argument(format!(
                "amount {} is below the smallest {} unit",
                amount, currency
            )));
        }
        Ok(Self {
            amount: minor,
            currency,
        })
    }

    /// Parse both the decimal amount and the currency code
    pub fn parse(amount: f64, currency: &str) -> PaymentResult<Self> {
        let currency = currency.parse::<Currency>()?;
        Self::from_decimal(amount, currency)
    }

    /// Get the decimal amount
    pub fn as_decimal(&self) -> f64 {
        self.currency.from_minor_units(self.amount)
    }

    /// Format for logs (e.g., "100.00 SAR")
    pub fn display(&self) -> String {
        format!(
            "{:.*} {}",
            self.currency.decimal_places() as usize,
            self.as_decimal(),
            self.currency
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_parsing() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::USD);
        assert_eq!(" SAR ".parse::<Currency>().unwrap(), Currency::SAR);
        assert!("US".parse::<Currency>().is_err());
        assert!("XYZ".parse::<Currency>().is_err());
        assert!("dollars".parse::<Currency>().is_err());
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Money::parse(100.0, "USD").unwrap().amount, 10_000);
        assert_eq!(Money::parse(1.5, "KWD").unwrap().amount, 1_500);
        assert_eq!(Money::parse(19.99, "SAR").unwrap().as_decimal(), 19.99);
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        assert!(Money::parse(0.0, "USD").is_err());
        assert!(Money::parse(-5.0, "USD").is_err());
        assert!(Money::parse(f64::NAN, "USD").is_err());
        assert!(Money::parse(0.001, "USD").is_err());
    }

    #[test]
    fn test_rejects_amounts_beyond_cap() {
        let err = Money::parse(1e300, "USD").unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert!(Money::parse(1e299, "USD").is_err());
        assert!(Money::parse(f64::MAX, "KWD").is_err());

        assert_eq!(Money::parse(1e13, "USD").unwrap().amount, 1_000_000_000_000_000);
        assert!(Money::parse(1e14, "USD").is_err());
        assert!(Money::parse(1e13, "KWD").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::parse(100.0, "USD").unwrap().display(), "100.00 USD");
        assert_eq!(Money::parse(2.5, "BHD").unwrap().display(), "2.500 BHD");
    }
}
