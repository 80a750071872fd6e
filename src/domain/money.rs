use crate::error::PaymentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A signed monetary value in minor currency units (cents, pence, ...).
///
/// All ledger arithmetic is integer arithmetic; conversion to a decimal
/// major-unit figure only happens for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Balance(pub i64);

/// A strictly positive monetary amount in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(minor_units: i64) -> Result<Self, PaymentError> {
        if minor_units > 0 {
            Ok(Self(minor_units))
        } else {
            Err(PaymentError::ValidationError(format!(
                "Amount must be positive, got {minor_units}"
            )))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = PaymentError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Balance {
    pub const ZERO: Self = Self(0);

    pub fn new(minor_units: i64) -> Self {
        Self(minor_units)
    }

    pub fn checked_add(self, amount: Amount) -> Option<Self> {
        self.0.checked_add(amount.0).map(Self)
    }

    pub fn checked_sub(self, amount: Amount) -> Option<Self> {
        self.0.checked_sub(amount.0).map(Self)
    }

    /// Renders the balance in major units with `exponent` decimal places.
    pub fn to_major(self, exponent: u32) -> Decimal {
        Decimal::new(self.0, exponent).normalize()
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// ISO 4217 alphabetic currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, PaymentError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code))
        } else {
            Err(PaymentError::ValidationError(format!(
                "Invalid currency code {code:?}"
            )))
        }
    }

    /// Brazilian real, the default ledger currency.
    pub fn brl() -> Self {
        Self("BRL".to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of minor-unit digits used when rendering amounts.
    pub fn exponent(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "CLP" => 0,
            "BHD" | "KWD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_arithmetic() {
        let b1 = Balance::new(1000);
        let b2 = Balance::new(500);
        assert_eq!(b1 + b2, Balance::new(1500));
        assert_eq!(b1 - b2, Balance::new(500));
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(1).is_ok());
        assert!(matches!(
            Amount::new(0),
            Err(PaymentError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(-1),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_amount_deserialization_rejects_non_positive() {
        assert!(serde_json::from_str::<Amount>("250").is_ok());
        assert!(serde_json::from_str::<Amount>("0").is_err());
    }

    #[test]
    fn test_checked_arithmetic_overflow() {
        let max = Balance::new(i64::MAX);
        assert!(max.checked_add(Amount::new(1).unwrap()).is_none());
        assert_eq!(
            Balance::new(10).checked_sub(Amount::new(3).unwrap()),
            Some(Balance::new(7))
        );
    }

    #[test]
    fn test_major_unit_rendering() {
        assert_eq!(Balance::new(12345).to_major(2), dec!(123.45));
        assert_eq!(Balance::new(1500).to_major(2), dec!(15));
        assert_eq!(Balance::new(-5).to_major(2), dec!(-0.05));
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(Currency::new("brl").unwrap().code(), "BRL");
        assert_eq!(Currency::new("JPY").unwrap().exponent(), 0);
        assert!(Currency::new("EURO").is_err());
        assert!(Currency::new("E1R").is_err());
    }
}
