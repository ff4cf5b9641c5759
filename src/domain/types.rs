//! Enumerations shared across the account, transfer and payment domains.
//!
//! All of them travel as SCREAMING_SNAKE_CASE strings, both on the wire and
//! in the read-model tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error for unknown enum strings coming from requests or the database
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Frozen,
}

string_enum!(AccountStatus, "account status", {
    Active => "ACTIVE",
    Inactive => "INACTIVE",
    Frozen => "FROZEN",
});

impl AccountStatus {
    pub fn is_active(&self) -> bool {
        *self == AccountStatus::Active
    }
}

/// Account product type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    #[default]
    Checking,
    Savings,
    Investment,
}

string_enum!(AccountType, "account type", {
    Checking => "CHECKING",
    Savings => "SAVINGS",
    Investment => "INVESTMENT",
});

/// Kind of balance movement recorded in the transaction history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    TransferOut,
    TransferIn,
    Payment,
    Refund,
}

string_enum!(TransactionType, "transaction type", {
    Deposit => "DEPOSIT",
    Withdraw => "WITHDRAW",
    TransferOut => "TRANSFER_OUT",
    TransferIn => "TRANSFER_IN",
    Payment => "PAYMENT",
    Refund => "REFUND",
});

impl TransactionType {
    /// Withdrawals reduce the balance and count toward the daily limit
    pub fn is_withdrawal(&self) -> bool {
        matches!(
            self,
            TransactionType::Withdraw | TransactionType::TransferOut | TransactionType::Payment
        )
    }

    /// Prefix used for generated transaction ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEP",
            TransactionType::Withdraw => "WTH",
            TransactionType::TransferOut | TransactionType::TransferIn => "TRF",
            TransactionType::Payment => "PAY",
            TransactionType::Refund => "RFD",
        }
    }
}

/// Transfer outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Completed,
    Failed,
}

string_enum!(TransferStatus, "transfer status", {
    Completed => "COMPLETED",
    Failed => "FAILED",
});

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Authorized,
    Captured,
    PartiallyRefunded,
    Refunded,
    Cancelled,
    Failed,
}

string_enum!(PaymentStatus, "payment status", {
    Authorized => "AUTHORIZED",
    Captured => "CAPTURED",
    PartiallyRefunded => "PARTIALLY_REFUNDED",
    Refunded => "REFUNDED",
    Cancelled => "CANCELLED",
    Failed => "FAILED",
});

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Refunded | PaymentStatus::Cancelled | PaymentStatus::Failed
        )
    }
}
