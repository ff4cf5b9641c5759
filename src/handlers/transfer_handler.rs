//! Transfer Handler
//!
//! Moves money between two accounts. Both legs, their history rows and the
//! transfer record commit in one database transaction.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::cache::AccountCache;
use crate::config::TransactionLimits;
use crate::domain::{
    generate_transaction_id, transfer_in_id, DomainError, OperationContext, TransactionDetails,
    TransactionType, TransferEvent, TransferFailureReason, TransferStatus,
};
use crate::error::AppError;

use super::account_handler::ensure_within_limit;
use super::recorder::EventRecorder;
use super::retry::with_conflict_retry;
use super::{TransferCommand, TransferResult};

/// Handler for transfers between accounts
#[derive(Clone)]
pub struct TransferHandler {
    recorder: EventRecorder,
    limits: TransactionLimits,
}

impl TransferHandler {
    pub fn new(pool: PgPool, cache: Arc<dyn AccountCache>, limits: TransactionLimits) -> Self {
        Self {
            recorder: EventRecorder::new(pool, cache),
            limits,
        }
    }

    /// Execute the transfer command.
    ///
    /// Insufficient balance, an inactive account or an exhausted daily limit
    /// are recorded as a FAILED transfer before the error is returned.
    pub async fn execute(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> Result<TransferResult, AppError> {
        if command.from_account_number == command.to_account_number {
            return Err(DomainError::SameAccountTransfer.into());
        }
        ensure_within_limit(&command.amount, &self.limits)?;

        let transaction_id = self.claim_transaction_id(command.transaction_id.clone()).await?;
        let transfer_id = Uuid::new_v4();

        let result = with_conflict_retry("transfer", || {
            self.try_transfer(&command, transfer_id, &transaction_id, context)
        })
        .await;

        match result {
            Err(AppError::Domain(err)) => {
                if let Some(reason) = TransferFailureReason::from_domain_error(&err) {
                    self.record_failure(&command, transfer_id, reason, context).await;
                }
                Err(AppError::Domain(err))
            }
            other => other,
        }
    }

    async fn try_transfer(
        &self,
        command: &TransferCommand,
        transfer_id: Uuid,
        transaction_id: &str,
        context: &OperationContext,
    ) -> Result<TransferResult, AppError> {
        let from = self
            .recorder
            .load_account(command.from_account_number.as_str())
            .await?;
        let to = self
            .recorder
            .load_account(command.to_account_number.as_str())
            .await?;

        let now = Utc::now();
        let amount = &command.amount;

        let out_details = TransactionDetails::new(
            transaction_id,
            TransactionType::TransferOut,
            describe(command.memo.as_deref(), "Transfer to", to.account_number()),
        )
        .with_reference(transfer_id)
        .with_counterpart(to.account_number(), to.alias().map(str::to_string));

        let in_details = TransactionDetails::new(
            transfer_in_id(transaction_id),
            TransactionType::TransferIn,
            describe(command.memo.as_deref(), "Transfer from", from.account_number()),
        )
        .with_reference(transfer_id)
        .with_counterpart(from.account_number(), from.alias().map(str::to_string));

        let debit = from.debit(amount, out_details, self.limits.daily_withdrawal_limit, now)?;
        let credit = to.credit(amount, in_details, now)?;

        let completed = TransferEvent::TransferCompleted {
            transfer_id,
            from_account_number: from.account_number().to_string(),
            to_account_number: to.account_number().to_string(),
            amount: amount.value(),
            memo: command.memo.clone(),
            transaction_id: transaction_id.to_string(),
            completed_at: now,
        };

        // Lock rows in a fixed order so opposite transfers cannot deadlock
        let from_id = from.id();
        let mut legs = vec![(from, debit), (to, credit)];
        legs.sort_by_key(|(account, _)| account.id());

        let mut tx = self.recorder.begin().await?;
        let mut updated = Vec::with_capacity(2);
        for (account, event) in legs {
            updated.push(
                self.recorder
                    .record_account(&mut tx, account, vec![event], context)
                    .await?,
            );
        }
        let transfer = self.recorder.record_transfer(&mut tx, completed, context).await?;
        tx.commit().await?;

        for account in &updated {
            self.recorder.account_committed(account).await;
        }

        let from_balance_after = updated
            .iter()
            .find(|account| account.id() == from_id)
            .map(|account| account.balance().value())
            .unwrap_or_default();

        tracing::info!(
            transfer_id = %transfer_id,
            transaction_id = %transaction_id,
            amount = %amount,
            "Transfer completed"
        );

        Ok(TransferResult {
            transfer_id,
            transaction_id: transaction_id.to_string(),
            from_account_number: transfer.from_account_number().to_string(),
            to_account_number: transfer.to_account_number().to_string(),
            amount: transfer.amount(),
            memo: transfer.memo().map(str::to_string),
            status: TransferStatus::Completed,
            from_balance_after,
            completed_at: transfer.created_at().unwrap_or(now),
        })
    }

    /// Best effort: the caller gets the business error either way
    async fn record_failure(
        &self,
        command: &TransferCommand,
        transfer_id: Uuid,
        reason: TransferFailureReason,
        context: &OperationContext,
    ) {
        let event = failed_event(command, transfer_id, reason, Utc::now());

        let recorded = async {
            let mut tx = self.recorder.begin().await?;
            self.recorder.record_transfer(&mut tx, event, context).await?;
            tx.commit().await?;
            Ok::<_, AppError>(())
        }
        .await;

        match recorded {
            Ok(()) => tracing::info!(
                transfer_id = %transfer_id,
                reason = reason.as_str(),
                "Transfer failed"
            ),
            Err(e) => tracing::error!(
                transfer_id = %transfer_id,
                error = %e,
                "Failed to record failed transfer"
            ),
        }
    }

    /// Both the outgoing id and its `_IN` twin must be unused
    async fn claim_transaction_id(&self, requested: Option<String>) -> Result<String, AppError> {
        let id = match requested {
            Some(id) => id,
            None => return Ok(generate_transaction_id(TransactionType::TransferOut, Utc::now())),
        };

        let projection = self.recorder.projection();
        if projection.transaction_exists(&id).await?
            || projection.transaction_exists(&transfer_in_id(&id)).await?
        {
            return Err(DomainError::DuplicateTransaction { transaction_id: id }.into());
        }

        Ok(id)
    }
}

fn describe(memo: Option<&str>, direction: &str, counterpart: &str) -> String {
    match memo {
        Some(memo) if !memo.trim().is_empty() => memo.to_string(),
        _ => format!("{} {}", direction, counterpart),
    }
}

fn failed_event(
    command: &TransferCommand,
    transfer_id: Uuid,
    reason: TransferFailureReason,
    now: DateTime<Utc>,
) -> TransferEvent {
    TransferEvent::TransferFailed {
        transfer_id,
        from_account_number: command.from_account_number.to_string(),
        to_account_number: command.to_account_number.to_string(),
        amount: command.amount.value(),
        memo: command.memo.clone(),
        reason,
        failed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Transfer;
    use crate::domain::{AccountNumber, Money};

    fn command() -> TransferCommand {
        TransferCommand::new(
            AccountNumber::parse("1001234567890").unwrap(),
            AccountNumber::parse("1009876543210").unwrap(),
            Money::from_units(100).unwrap(),
        )
        .with_memo("rent".to_string())
    }

    #[test]
    fn test_describe_prefers_memo() {
        assert_eq!(describe(Some("rent"), "Transfer to", "1009876543210"), "rent");
        assert_eq!(
            describe(None, "Transfer to", "1009876543210"),
            "Transfer to 1009876543210"
        );
        assert_eq!(
            describe(Some("  "), "Transfer from", "1001234567890"),
            "Transfer from 1001234567890"
        );
    }

    #[test]
    fn test_failed_event_builds_failed_transfer() {
        let transfer_id = Uuid::new_v4();
        let event = failed_event(
            &command(),
            transfer_id,
            TransferFailureReason::InsufficientBalance,
            Utc::now(),
        );

        let transfer = Transfer::default().apply(event);
        assert_eq!(transfer.id(), transfer_id);
        assert_eq!(transfer.status(), Some(TransferStatus::Failed));
        assert_eq!(
            transfer.failure_reason(),
            Some(TransferFailureReason::InsufficientBalance)
        );
        assert_eq!(transfer.memo(), Some("rent"));
        assert!(transfer.transaction_id().is_none());
    }
}
