//! Account number value object

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 20;

/// Prefix for generated account numbers (branch code)
const GENERATED_PREFIX: &str = "100";

/// Length of generated account numbers
const GENERATED_LENGTH: usize = 13;

/// An account number: 10 to 20 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountNumberError {
    #[error("Account number is required")]
    Empty,

    #[error("Account number must be 10-20 digits")]
    InvalidFormat,
}

impl AccountNumber {
    pub fn parse(value: &str) -> Result<Self, AccountNumberError> {
        if value.trim().is_empty() {
            return Err(AccountNumberError::Empty);
        }

        let valid_length = (MIN_DIGITS..=MAX_DIGITS).contains(&value.len());
        if !valid_length || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AccountNumberError::InvalidFormat);
        }

        Ok(Self(value.to_string()))
    }

    /// Generate a fresh random account number under the default branch prefix
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..GENERATED_LENGTH - GENERATED_PREFIX.len())
            .map(|_| char::from(b'0' + rng.gen_range(0..10)))
            .collect();
        Self(format!("{}{}", GENERATED_PREFIX, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Masked form for logs: keeps the first 3 and last 4 digits
    pub fn masked(&self) -> String {
        let len = self.0.len();
        format!("{}{}{}", &self.0[..3], "*".repeat(len - 7), &self.0[len - 4..])
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountNumber {
    type Err = AccountNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = AccountNumberError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountNumber> for String {
    fn from(value: AccountNumber) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_lengths() {
        assert!(AccountNumber::parse("1234567890").is_ok());
        assert!(AccountNumber::parse("12345678901234567890").is_ok());
    }

    #[test]
    fn test_invalid_numbers() {
        assert_eq!(AccountNumber::parse(""), Err(AccountNumberError::Empty));
        assert_eq!(AccountNumber::parse("   "), Err(AccountNumberError::Empty));
        assert_eq!(AccountNumber::parse("123456789"), Err(AccountNumberError::InvalidFormat));
        assert_eq!(
            AccountNumber::parse("123456789012345678901"),
            Err(AccountNumberError::InvalidFormat)
        );
        assert_eq!(AccountNumber::parse("12345abcde"), Err(AccountNumberError::InvalidFormat));
        assert_eq!(AccountNumber::parse("１２３４５６７８９０"), Err(AccountNumberError::InvalidFormat));
    }

    #[test]
    fn test_generate_is_valid() {
        for _ in 0..20 {
            let generated = AccountNumber::generate();
            assert!(AccountNumber::parse(generated.as_str()).is_ok());
            assert!(generated.as_str().starts_with("100"));
        }
    }

    #[test]
    fn test_masked() {
        let number = AccountNumber::parse("1001234567890").unwrap();
        assert_eq!(number.masked(), "100******7890");
    }

    #[test]
    fn test_serde_validates() {
        let ok: Result<AccountNumber, _> = serde_json::from_str("\"1001234567890\"");
        assert!(ok.is_ok());
        let bad: Result<AccountNumber, _> = serde_json::from_str("\"12\"");
        assert!(bad.is_err());
    }
}
