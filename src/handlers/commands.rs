//! Command definitions
//!
//! Commands represent intentions to change the system state. Fields are
//! already validated value types; the API layer builds them from requests.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Account;
use crate::domain::{
    AccountNumber, AccountStatus, AccountType, Money, TransactionDetails, TransactionType,
    TransferStatus,
};

// =========================================================================
// Account commands
// =========================================================================

#[derive(Debug, Clone)]
pub struct OpenAccountCommand {
    /// Generated when absent
    pub account_number: Option<AccountNumber>,
    pub account_type: AccountType,
    pub alias: Option<String>,
    pub initial_deposit: Option<Money>,
}

impl OpenAccountCommand {
    pub fn new(account_type: AccountType) -> Self {
        Self {
            account_number: None,
            account_type,
            alias: None,
            initial_deposit: None,
        }
    }

    pub fn with_account_number(mut self, account_number: AccountNumber) -> Self {
        self.account_number = Some(account_number);
        self
    }

    pub fn with_alias(mut self, alias: String) -> Self {
        self.alias = Some(alias);
        self
    }

    pub fn with_initial_deposit(mut self, amount: Money) -> Self {
        self.initial_deposit = Some(amount);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DepositCommand {
    pub account_number: AccountNumber,
    pub amount: Money,
    pub description: String,
    pub transaction_id: Option<String>,
    pub source_type: Option<String>,
    pub depositor_info: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WithdrawCommand {
    pub account_number: AccountNumber,
    pub amount: Money,
    pub description: String,
    pub transaction_id: Option<String>,
    pub reason_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChangeStatusCommand {
    pub account_number: AccountNumber,
    pub status: AccountStatus,
}

// =========================================================================
// Transfer command
// =========================================================================

#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub from_account_number: AccountNumber,
    pub to_account_number: AccountNumber,
    pub amount: Money,
    pub memo: Option<String>,
    pub transaction_id: Option<String>,
}

impl TransferCommand {
    pub fn new(from: AccountNumber, to: AccountNumber, amount: Money) -> Self {
        Self {
            from_account_number: from,
            to_account_number: to,
            amount,
            memo: None,
            transaction_id: None,
        }
    }

    pub fn with_memo(mut self, memo: String) -> Self {
        self.memo = Some(memo);
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: String) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }
}

// =========================================================================
// Payment commands
// =========================================================================

#[derive(Debug, Clone)]
pub struct AuthorizePaymentCommand {
    pub account_number: AccountNumber,
    pub merchant_id: String,
    pub order_id: String,
    pub amount: Money,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundPaymentCommand {
    pub payment_id: Uuid,
    /// Remaining refundable amount when absent
    pub amount: Option<Money>,
}

// =========================================================================
// Results
// =========================================================================

/// One recorded balance movement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_id: String,
    pub account_number: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub available_balance: Decimal,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TransactionReceipt {
    /// Receipt for a movement already applied to `account`
    pub fn from_account(
        account: &Account,
        details: &TransactionDetails,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        let balance_after = account.balance().value();
        let balance_before = if details.transaction_type.is_withdrawal() {
            balance_after + amount
        } else {
            balance_after - amount
        };

        Self {
            transaction_id: details.transaction_id.clone(),
            account_number: account.account_number().to_string(),
            transaction_type: details.transaction_type,
            amount,
            balance_before,
            balance_after,
            available_balance: account.available_balance(),
            description: details.description.clone(),
            reference_id: details.reference_id,
            created_at: at,
        }
    }
}

/// Result of a completed transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer_id: Uuid,
    pub transaction_id: String,
    pub from_account_number: String,
    pub to_account_number: String,
    pub amount: Decimal,
    pub memo: Option<String>,
    pub status: TransferStatus,
    /// Sender balance after the transfer
    pub from_balance_after: Decimal,
    pub completed_at: DateTime<Utc>,
}
