//! Money types
//!
//! Domain primitives for monetary amounts with business rule validation.
//! All amounts are validated at construction time, ensuring invalid values
//! cannot exist in the system.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed number of fractional digits for every amount (KRW cents)
pub const MONEY_SCALE: u32 = 2;

/// Maximum number of integer digits a single amount may carry
const MAX_INTEGER_DIGITS: u32 = 10;

/// Upper bound for an account balance
const MAX_BALANCE: &str = "999999999999999.99";

/// Money represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - At most 2 decimal places, always stored at scale 2
/// - At most 10 integer digits
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use fintech_platform::domain::Money;
///
/// let money = Money::new(Decimal::new(15, 1)).unwrap();
/// assert_eq!(money.to_string(), "1.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

/// Errors that can occur when creating money values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Amount must be greater than zero (got {0})")]
    NotPositive(Decimal),

    #[error("Amount cannot be negative (got {0})")]
    Negative(Decimal),

    #[error("Amount allows at most {MONEY_SCALE} decimal places (got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds the maximum of {MAX_INTEGER_DIGITS} integer digits")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

fn normalize(value: Decimal) -> Decimal {
    let mut value = value;
    value.rescale(MONEY_SCALE);
    value
}

impl Money {
    /// Create a new Money with validation.
    ///
    /// # Errors
    /// - `MoneyError::NotPositive` if value <= 0
    /// - `MoneyError::TooManyDecimals` if more than 2 significant decimal places
    /// - `MoneyError::Overflow` if more than 10 integer digits
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value <= Decimal::ZERO {
            return Err(MoneyError::NotPositive(value));
        }

        // Trailing zeros do not count: 1.500 is a valid 1.50
        let normalized = value.normalize();
        if normalized.scale() > MONEY_SCALE {
            return Err(MoneyError::TooManyDecimals(normalized.scale()));
        }

        if value.trunc() >= Decimal::from(10_i64.pow(MAX_INTEGER_DIGITS)) {
            return Err(MoneyError::Overflow);
        }

        Ok(Self(normalize(value)))
    }

    /// Create Money from whole currency units.
    pub fn from_units(units: i64) -> Result<Self, MoneyError> {
        Self::new(Decimal::from(units))
    }

    /// Get the underlying Decimal value (scale 2).
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Add two amounts, failing on overflow.
    pub fn try_add(&self, other: &Money) -> Result<Money, MoneyError> {
        Money::new(self.0 + other.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim())
            .map_err(|e| MoneyError::ParseError(e.to_string()))?;
        Money::new(decimal)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Money::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

/// Balance represents an account balance (zero or positive).
/// Unlike Money, Balance can be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Balance(Decimal);

impl Balance {
    /// Create a new balance (zero or positive)
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value < Decimal::ZERO {
            return Err(MoneyError::Negative(value));
        }

        let normalized = value.normalize();
        if normalized.scale() > MONEY_SCALE {
            return Err(MoneyError::TooManyDecimals(normalized.scale()));
        }

        let max = Decimal::from_str(MAX_BALANCE).map_err(|e| MoneyError::ParseError(e.to_string()))?;
        if value > max {
            return Err(MoneyError::Overflow);
        }

        Ok(Self(normalize(value)))
    }

    /// Create a zero balance
    pub fn zero() -> Self {
        Self(normalize(Decimal::ZERO))
    }

    /// Get the underlying value
    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Check if balance covers the given amount
    pub fn is_sufficient_for(&self, amount: &Money) -> bool {
        self.0 >= amount.value()
    }

    /// Add amount to balance
    pub fn credit(&self, amount: &Money) -> Result<Balance, MoneyError> {
        Balance::new(self.0 + amount.value())
    }

    /// Subtract amount from balance
    pub fn debit(&self, amount: &Money) -> Result<Balance, MoneyError> {
        Balance::new(self.0 - amount.value())
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::zero()
    }
}

impl TryFrom<Decimal> for Balance {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Balance::new(value)
    }
}

impl From<Balance> for Decimal {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_positive() {
        let money = Money::new(dec!(100)).unwrap();
        assert_eq!(money.value(), dec!(100.00));
        assert_eq!(money.value().scale(), 2);
    }

    #[test]
    fn test_money_zero_rejected() {
        assert!(matches!(Money::new(Decimal::ZERO), Err(MoneyError::NotPositive(_))));
    }

    #[test]
    fn test_money_negative_rejected() {
        assert!(matches!(Money::new(dec!(-0.01)), Err(MoneyError::NotPositive(_))));
    }

    #[test]
    fn test_money_too_many_decimals() {
        assert!(matches!(Money::new(dec!(0.001)), Err(MoneyError::TooManyDecimals(3))));
    }

    #[test]
    fn test_money_trailing_zeros_accepted() {
        let money = Money::new(dec!(1.500)).unwrap();
        assert_eq!(money.to_string(), "1.50");
    }

    #[test]
    fn test_money_integer_digit_limit() {
        assert!(Money::new(dec!(9999999999.99)).is_ok());
        assert!(matches!(Money::new(dec!(10000000000)), Err(MoneyError::Overflow)));
    }

    #[test]
    fn test_money_from_str() {
        let money: Money = "123.4".parse().unwrap();
        assert_eq!(money.to_string(), "123.40");

        let bad: Result<Money, _> = "12a".parse();
        assert!(matches!(bad, Err(MoneyError::ParseError(_))));
    }

    #[test]
    fn test_money_serde_accepts_number_and_string() {
        let from_number: Money = serde_json::from_str("50000.5").unwrap();
        let from_string: Money = serde_json::from_str("\"50000.50\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(serde_json::to_string(&from_number).unwrap(), "\"50000.50\"");

        let zero: Result<Money, _> = serde_json::from_str("0");
        assert!(zero.is_err());
    }

    #[test]
    fn test_balance_credit_debit() {
        let balance = Balance::zero();
        let balance = balance.credit(&Money::from_units(100).unwrap()).unwrap();
        assert_eq!(balance.value(), dec!(100.00));

        let balance = balance.debit(&Money::from_units(30).unwrap()).unwrap();
        assert_eq!(balance.value(), dec!(70.00));
    }

    #[test]
    fn test_balance_cannot_go_negative() {
        let balance = Balance::new(dec!(50)).unwrap();
        let amount = Money::from_units(100).unwrap();

        assert!(!balance.is_sufficient_for(&amount));
        assert!(matches!(balance.debit(&amount), Err(MoneyError::Negative(_))));
    }

    #[test]
    fn test_balance_zero_display() {
        assert_eq!(Balance::zero().to_string(), "0.00");
    }
}
