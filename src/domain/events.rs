//! Domain Events
//!
//! Event definitions for Event Sourcing.
//! Events are immutable facts that have happened in the system.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountStatus, AccountType, DomainError, TransactionType};

/// Descriptive data carried by every balance movement.
///
/// The account transaction history is projected from these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub transaction_id: String,
    pub transaction_type: TransactionType,
    pub description: String,

    /// Transfer or payment this movement belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depositor_info: Option<String>,
}

impl TransactionDetails {
    pub fn new(
        transaction_id: impl Into<String>,
        transaction_type: TransactionType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            transaction_type,
            description: description.into(),
            reference_id: None,
            counterpart_account: None,
            counterpart_name: None,
            reason_code: None,
            source_type: None,
            depositor_info: None,
        }
    }

    pub fn with_reference(mut self, reference_id: Uuid) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    pub fn with_counterpart(mut self, account: impl Into<String>, name: Option<String>) -> Self {
        self.counterpart_account = Some(account.into());
        self.counterpart_name = name;
        self
    }
}

/// Account-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountEvent {
    /// Account was opened
    AccountOpened {
        account_id: Uuid,
        account_number: String,
        account_type: AccountType,
        #[serde(default)]
        alias: Option<String>,
        opened_at: DateTime<Utc>,
    },

    /// Money was credited to the account (balance increased)
    MoneyCredited {
        account_id: Uuid,
        amount: Decimal,
        details: TransactionDetails,
        credited_at: DateTime<Utc>,
    },

    /// Money was debited from the account (balance decreased)
    MoneyDebited {
        account_id: Uuid,
        amount: Decimal,
        details: TransactionDetails,
        debited_at: DateTime<Utc>,
    },

    /// Funds were reserved for an authorized payment
    FundsHeld {
        account_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
        held_at: DateTime<Utc>,
    },

    /// A payment hold was released without moving money
    HoldReleased {
        account_id: Uuid,
        payment_id: Uuid,
        released_at: DateTime<Utc>,
    },

    /// Held funds were debited for a captured payment
    HoldCaptured {
        account_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
        details: TransactionDetails,
        captured_at: DateTime<Utc>,
    },

    /// Account status changed
    StatusChanged {
        account_id: Uuid,
        from: AccountStatus,
        to: AccountStatus,
        changed_at: DateTime<Utc>,
    },
}

impl AccountEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened { .. } => "AccountOpened",
            AccountEvent::MoneyCredited { .. } => "MoneyCredited",
            AccountEvent::MoneyDebited { .. } => "MoneyDebited",
            AccountEvent::FundsHeld { .. } => "FundsHeld",
            AccountEvent::HoldReleased { .. } => "HoldReleased",
            AccountEvent::HoldCaptured { .. } => "HoldCaptured",
            AccountEvent::StatusChanged { .. } => "StatusChanged",
        }
    }

    /// Get the account ID this event relates to
    pub fn account_id(&self) -> Uuid {
        match self {
            AccountEvent::AccountOpened { account_id, .. }
            | AccountEvent::MoneyCredited { account_id, .. }
            | AccountEvent::MoneyDebited { account_id, .. }
            | AccountEvent::FundsHeld { account_id, .. }
            | AccountEvent::HoldReleased { account_id, .. }
            | AccountEvent::HoldCaptured { account_id, .. }
            | AccountEvent::StatusChanged { account_id, .. } => *account_id,
        }
    }

    /// Balance movement carried by this event, if any
    pub fn transaction(&self) -> Option<(&TransactionDetails, Decimal, DateTime<Utc>)> {
        match self {
            AccountEvent::MoneyCredited {
                details,
                amount,
                credited_at,
                ..
            } => Some((details, *amount, *credited_at)),
            AccountEvent::MoneyDebited {
                details,
                amount,
                debited_at,
                ..
            } => Some((details, *amount, *debited_at)),
            AccountEvent::HoldCaptured {
                details,
                amount,
                captured_at,
                ..
            } => Some((details, *amount, *captured_at)),
            _ => None,
        }
    }
}

/// Transfer-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransferEvent {
    /// Both legs of the transfer were recorded
    TransferCompleted {
        transfer_id: Uuid,
        from_account_number: String,
        to_account_number: String,
        amount: Decimal,
        #[serde(default)]
        memo: Option<String>,
        transaction_id: String,
        completed_at: DateTime<Utc>,
    },

    /// Transfer was rejected by a business rule
    TransferFailed {
        transfer_id: Uuid,
        from_account_number: String,
        to_account_number: String,
        amount: Decimal,
        #[serde(default)]
        memo: Option<String>,
        reason: TransferFailureReason,
        failed_at: DateTime<Utc>,
    },
}

impl TransferEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferCompleted { .. } => "TransferCompleted",
            TransferEvent::TransferFailed { .. } => "TransferFailed",
        }
    }

    /// Get the transfer ID this event relates to
    pub fn transfer_id(&self) -> Uuid {
        match self {
            TransferEvent::TransferCompleted { transfer_id, .. }
            | TransferEvent::TransferFailed { transfer_id, .. } => *transfer_id,
        }
    }
}

/// Reasons why a transfer might fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferFailureReason {
    /// Sender doesn't have enough available balance
    InsufficientBalance,

    /// Sender or receiver account is not active
    InactiveAccount,

    /// Sender's daily withdrawal limit would be exceeded
    DailyLimitExceeded,
}

impl TransferFailureReason {
    /// Business-rule failures that are recorded as a FAILED transfer.
    /// Anything else is returned to the caller without a transfer record.
    pub fn from_domain_error(err: &DomainError) -> Option<Self> {
        match err {
            DomainError::InsufficientBalance { .. } => Some(Self::InsufficientBalance),
            DomainError::InactiveAccount { .. } => Some(Self::InactiveAccount),
            DomainError::DailyLimitExceeded { .. } => Some(Self::DailyLimitExceeded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferFailureReason::InsufficientBalance => "INSUFFICIENT_BALANCE",
            TransferFailureReason::InactiveAccount => "INACTIVE_ACCOUNT",
            TransferFailureReason::DailyLimitExceeded => "DAILY_LIMIT_EXCEEDED",
        }
    }
}

impl std::fmt::Display for TransferFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferFailureReason::InsufficientBalance => write!(f, "Insufficient balance"),
            TransferFailureReason::InactiveAccount => write!(f, "Account is not active"),
            TransferFailureReason::DailyLimitExceeded => write!(f, "Daily withdrawal limit exceeded"),
        }
    }
}

/// Payment-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PaymentEvent {
    /// Gateway approved the payment and funds are held
    PaymentAuthorized {
        payment_id: Uuid,
        account_number: String,
        merchant_id: String,
        order_id: String,
        amount: Decimal,
        gateway_reference: String,
        #[serde(default)]
        description: Option<String>,
        authorized_at: DateTime<Utc>,
    },

    /// Gateway declined the payment
    PaymentFailed {
        payment_id: Uuid,
        account_number: String,
        merchant_id: String,
        order_id: String,
        amount: Decimal,
        reason: String,
        failed_at: DateTime<Utc>,
    },

    PaymentCaptured {
        payment_id: Uuid,
        amount: Decimal,
        transaction_id: String,
        captured_at: DateTime<Utc>,
    },

    /// Cancel accepted; the gateway void is outstanding
    PaymentCancelRequested {
        payment_id: Uuid,
        requested_at: DateTime<Utc>,
    },

    PaymentCancelled {
        payment_id: Uuid,
        cancelled_at: DateTime<Utc>,
    },

    /// Refund accepted; the gateway refund and the credit are outstanding.
    /// `transaction_id` doubles as the gateway idempotency key.
    PaymentRefundRequested {
        payment_id: Uuid,
        amount: Decimal,
        transaction_id: String,
        requested_at: DateTime<Utc>,
    },

    PaymentRefunded {
        payment_id: Uuid,
        amount: Decimal,
        transaction_id: String,
        refunded_at: DateTime<Utc>,
    },
}

impl PaymentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentAuthorized { .. } => "PaymentAuthorized",
            PaymentEvent::PaymentFailed { .. } => "PaymentFailed",
            PaymentEvent::PaymentCaptured { .. } => "PaymentCaptured",
            PaymentEvent::PaymentCancelRequested { .. } => "PaymentCancelRequested",
            PaymentEvent::PaymentCancelled { .. } => "PaymentCancelled",
            PaymentEvent::PaymentRefundRequested { .. } => "PaymentRefundRequested",
            PaymentEvent::PaymentRefunded { .. } => "PaymentRefunded",
        }
    }

    pub fn payment_id(&self) -> Uuid {
        match self {
            PaymentEvent::PaymentAuthorized { payment_id, .. }
            | PaymentEvent::PaymentFailed { payment_id, .. }
            | PaymentEvent::PaymentCaptured { payment_id, .. }
            | PaymentEvent::PaymentCancelRequested { payment_id, .. }
            | PaymentEvent::PaymentCancelled { payment_id, .. }
            | PaymentEvent::PaymentRefundRequested { payment_id, .. }
            | PaymentEvent::PaymentRefunded { payment_id, .. } => *payment_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_event_serialization() {
        let event = AccountEvent::MoneyCredited {
            account_id: Uuid::new_v4(),
            amount: dec!(100.00),
            details: TransactionDetails::new("DEP123", TransactionType::Deposit, "Salary"),
            credited_at: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"MoneyCredited\""));
        assert!(json.contains("\"transaction_type\":\"DEPOSIT\""));
        assert!(!json.contains("reference_id"));

        let deserialized: AccountEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.event_type(), deserialized.event_type());
        assert_eq!(event.account_id(), deserialized.account_id());
    }

    #[test]
    fn test_transaction_accessor() {
        let opened = AccountEvent::AccountOpened {
            account_id: Uuid::new_v4(),
            account_number: "1001234567890".to_string(),
            account_type: AccountType::Checking,
            alias: None,
            opened_at: Utc::now(),
        };
        assert!(opened.transaction().is_none());

        let captured = AccountEvent::HoldCaptured {
            account_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            amount: dec!(25.00),
            details: TransactionDetails::new("PAY1", TransactionType::Payment, "Order 1"),
            captured_at: Utc::now(),
        };
        let (details, amount, _) = captured.transaction().unwrap();
        assert_eq!(details.transaction_type, TransactionType::Payment);
        assert_eq!(amount, dec!(25.00));
    }

    #[test]
    fn test_transfer_failure_reason() {
        let reason = TransferFailureReason::InsufficientBalance;
        let json = serde_json::to_string(&reason).unwrap();
        assert_eq!(json, r#""INSUFFICIENT_BALANCE""#);

        let deserialized: TransferFailureReason = serde_json::from_str(&json).unwrap();
        assert_eq!(reason, deserialized);
    }

    #[test]
    fn test_failure_reason_from_domain_error() {
        let err = DomainError::insufficient_balance(dec!(10), dec!(5));
        assert_eq!(
            TransferFailureReason::from_domain_error(&err),
            Some(TransferFailureReason::InsufficientBalance)
        );
        assert_eq!(
            TransferFailureReason::from_domain_error(&DomainError::SameAccountTransfer),
            None
        );
    }
}
