//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

use super::{AccountNumberError, AccountStatus, MoneyError};

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Insufficient available balance for a debit or hold
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    /// Account is not ACTIVE and cannot transact
    #[error("Account is not active (status: {status})")]
    InactiveAccount { status: AccountStatus },

    /// Daily withdrawal limit would be exceeded
    #[error("Daily withdrawal limit exceeded: limit {limit}, used {used}, requested {requested}")]
    DailyLimitExceeded {
        limit: Decimal,
        used: Decimal,
        requested: Decimal,
    },

    /// Invalid amount (zero, negative, too precise, or above a limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed account number
    #[error("Invalid account number: {0}")]
    InvalidAccountNumber(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// Transfer to same account
    #[error("Cannot transfer to the same account")]
    SameAccountTransfer,

    /// Client supplied a transaction id that is already recorded
    #[error("Duplicate transaction: {transaction_id}")]
    DuplicateTransaction { transaction_id: String },

    #[error("Account number already exists: {0}")]
    DuplicateAccount(String),

    /// Operation not allowed in the aggregate's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Payment gateway declined the authorization
    #[error("Payment declined: {reason}")]
    PaymentDeclined { reason: String },

    /// Aggregate version conflict (optimistic locking)
    #[error("Version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: i64, found: i64 },
}

impl DomainError {
    pub fn insufficient_balance(requested: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance {
            requested,
            available,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        !self.is_conflict_error()
    }

    /// Check if this is a conflict error (retry may help)
    pub fn is_conflict_error(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<MoneyError> for DomainError {
    fn from(err: MoneyError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}

impl From<AccountNumberError> for DomainError {
    fn from(err: AccountNumberError) -> Self {
        Self::InvalidAccountNumber(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_balance_error() {
        let err = DomainError::insufficient_balance(dec!(100), dec!(50));

        assert!(err.is_client_error());
        assert!(!err.is_conflict_error());
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn test_inactive_account_error() {
        let err = DomainError::InactiveAccount {
            status: AccountStatus::Frozen,
        };
        assert!(err.to_string().contains("FROZEN"));
    }

    #[test]
    fn test_version_conflict_error() {
        let err = DomainError::VersionConflict {
            expected: 1,
            found: 2,
        };

        assert!(!err.is_client_error());
        assert!(err.is_conflict_error());
    }

    #[test]
    fn test_from_money_error() {
        let err: DomainError = MoneyError::NotPositive(Decimal::ZERO).into();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }
}
