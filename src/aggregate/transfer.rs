//! Transfer Aggregate
//!
//! A transfer is written once: completed or failed. The balance movements
//! live on the two account aggregates; this aggregate keeps the record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{TransferEvent, TransferFailureReason, TransferStatus};

use super::Aggregate;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transfer {
    id: Uuid,
    from_account_number: String,
    to_account_number: String,
    amount: Decimal,
    memo: Option<String>,
    status: Option<TransferStatus>,
    failure_reason: Option<TransferFailureReason>,
    transaction_id: Option<String>,
    version: i64,
    created_at: Option<DateTime<Utc>>,
}

impl Transfer {
    pub fn from_account_number(&self) -> &str {
        &self.from_account_number
    }

    pub fn to_account_number(&self) -> &str {
        &self.to_account_number
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    pub fn status(&self) -> Option<TransferStatus> {
        self.status
    }

    pub fn failure_reason(&self) -> Option<TransferFailureReason> {
        self.failure_reason
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl Aggregate for Transfer {
    type Event = TransferEvent;

    fn aggregate_type() -> &'static str {
        "Transfer"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            TransferEvent::TransferCompleted {
                transfer_id,
                from_account_number,
                to_account_number,
                amount,
                memo,
                transaction_id,
                completed_at,
            } => {
                self.id = transfer_id;
                self.from_account_number = from_account_number;
                self.to_account_number = to_account_number;
                self.amount = amount;
                self.memo = memo;
                self.status = Some(TransferStatus::Completed);
                self.transaction_id = Some(transaction_id);
                self.created_at = Some(completed_at);
            }

            TransferEvent::TransferFailed {
                transfer_id,
                from_account_number,
                to_account_number,
                amount,
                memo,
                reason,
                failed_at,
            } => {
                self.id = transfer_id;
                self.from_account_number = from_account_number;
                self.to_account_number = to_account_number;
                self.amount = amount;
                self.memo = memo;
                self.status = Some(TransferStatus::Failed);
                self.failure_reason = Some(reason);
                self.created_at = Some(failed_at);
            }
        }

        self.version += 1;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_completed_transfer() {
        let id = Uuid::new_v4();
        let transfer = Transfer::default().apply(TransferEvent::TransferCompleted {
            transfer_id: id,
            from_account_number: "1001111111111".to_string(),
            to_account_number: "1002222222222".to_string(),
            amount: dec!(10.00),
            memo: Some("rent".to_string()),
            transaction_id: "TRF1".to_string(),
            completed_at: Utc::now(),
        });

        assert_eq!(transfer.id(), id);
        assert_eq!(transfer.status(), Some(TransferStatus::Completed));
        assert_eq!(transfer.transaction_id(), Some("TRF1"));
        assert!(transfer.failure_reason().is_none());
        assert_eq!(transfer.version(), 1);
    }

    #[test]
    fn test_failed_transfer() {
        let transfer = Transfer::default().apply(TransferEvent::TransferFailed {
            transfer_id: Uuid::new_v4(),
            from_account_number: "1001111111111".to_string(),
            to_account_number: "1002222222222".to_string(),
            amount: dec!(10.00),
            memo: None,
            reason: TransferFailureReason::InsufficientBalance,
            failed_at: Utc::now(),
        });

        assert_eq!(transfer.status(), Some(TransferStatus::Failed));
        assert_eq!(
            transfer.failure_reason(),
            Some(TransferFailureReason::InsufficientBalance)
        );
        assert!(transfer.transaction_id().is_none());
    }
}
