//! Event recording
//!
//! Shared write path of all handlers: append events with the expected
//! versions, update the read models in the same database transaction, and
//! after commit drop cached reads and save snapshots.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate, Payment, Transfer};
use crate::cache::AccountCache;
use crate::domain::{AccountEvent, DomainError, OperationContext, PaymentEvent, TransferEvent};
use crate::error::AppError;
use crate::event_store::{AggregateOperation, EventStore};
use crate::projection::ProjectionService;

pub type DbTransaction = Transaction<'static, Postgres>;

#[derive(Clone)]
pub struct EventRecorder {
    pool: PgPool,
    event_store: EventStore,
    projection: ProjectionService,
    cache: Arc<dyn AccountCache>,
}

impl EventRecorder {
    pub fn new(pool: PgPool, cache: Arc<dyn AccountCache>) -> Self {
        Self {
            event_store: EventStore::new(pool.clone()),
            projection: ProjectionService::new(pool.clone()),
            pool,
            cache,
        }
    }

    pub fn projection(&self) -> &ProjectionService {
        &self.projection
    }

    pub async fn begin(&self) -> Result<DbTransaction, AppError> {
        Ok(self.pool.begin().await?)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    pub async fn load_account(&self, account_number: &str) -> Result<Account, AppError> {
        let account_id = self
            .projection
            .find_account_id(account_number)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(account_number.to_string()))?;

        let account = self
            .event_store
            .load_aggregate::<Account>(account_id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(account_number.to_string()))?;

        Ok(account)
    }

    pub async fn load_payment(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        let payment = self
            .event_store
            .load_aggregate::<Payment>(payment_id)
            .await?
            .ok_or_else(|| DomainError::PaymentNotFound(payment_id.to_string()))?;

        Ok(payment)
    }

    // =========================================================================
    // Writing (inside the caller's transaction)
    // =========================================================================

    /// Append `events` to `account` and project each of them.
    ///
    /// `account` is the state the events were decided on; for a new account
    /// pass `Account::default()`. Returns the state after all events.
    pub async fn record_account(
        &self,
        tx: &mut DbTransaction,
        account: Account,
        events: Vec<AccountEvent>,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        let operations = operations_for::<Account>(account.version(), &events, AccountEvent::account_id)?;
        let event_ids = self.event_store.append_in_tx(tx, &operations, context).await?;

        let mut account = account;
        for (event, event_id) in events.into_iter().zip(event_ids) {
            account = account.apply(event.clone());
            self.projection
                .apply_account_event(tx, &account, &event, event_id, context)
                .await?;
        }

        Ok(account)
    }

    pub async fn record_transfer(
        &self,
        tx: &mut DbTransaction,
        event: TransferEvent,
        context: &OperationContext,
    ) -> Result<Transfer, AppError> {
        let operations = operations_for::<Transfer>(0, std::slice::from_ref(&event), TransferEvent::transfer_id)?;
        self.event_store.append_in_tx(tx, &operations, context).await?;

        let transfer = Transfer::default().apply(event);
        self.projection.apply_transfer(tx, &transfer).await?;

        Ok(transfer)
    }

    pub async fn record_payment(
        &self,
        tx: &mut DbTransaction,
        payment: Payment,
        event: PaymentEvent,
        context: &OperationContext,
    ) -> Result<Payment, AppError> {
        let operations =
            operations_for::<Payment>(payment.version(), std::slice::from_ref(&event), PaymentEvent::payment_id)?;
        self.event_store.append_in_tx(tx, &operations, context).await?;

        let payment = payment.apply(event);
        self.projection.apply_payment(tx, &payment).await?;

        Ok(payment)
    }

    // =========================================================================
    // After commit
    // =========================================================================

    /// Drop cached reads of the changed accounts and snapshot them if due
    pub async fn account_committed(&self, account: &Account) {
        self.cache.invalidate(account.account_number()).await;
        self.snapshot(account).await;
    }

    /// Snapshot failures are logged only: the events are already committed
    pub async fn snapshot<A>(&self, aggregate: &A)
    where
        A: Aggregate + Serialize,
    {
        if let Err(e) = self.event_store.save_snapshot_if_needed(aggregate).await {
            tracing::warn!(
                aggregate_type = A::aggregate_type(),
                aggregate_id = %aggregate.id(),
                error = %e,
                "Failed to save snapshot"
            );
        }
    }
}

/// Operations with consecutive expected versions starting at `version`
fn operations_for<A: Aggregate>(
    version: i64,
    events: &[A::Event],
    aggregate_id: fn(&A::Event) -> Uuid,
) -> Result<Vec<AggregateOperation>, AppError> {
    events
        .iter()
        .enumerate()
        .map(|(i, event)| {
            AggregateOperation::for_event::<A>(aggregate_id(event), version + i as i64, event)
                .map_err(AppError::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::domain::{AccountType, Money, TransactionDetails, TransactionType};

    #[test]
    fn test_operations_for_new_account_use_event_ids_and_consecutive_versions() {
        let account_id = Uuid::new_v4();
        let now = Utc::now();
        let (opened_account, opened) = Account::open(
            account_id,
            "1001234567890".to_string(),
            AccountType::Checking,
            None,
            now,
        );
        let deposit = opened_account
            .credit(
                &Money::from_units(5).unwrap(),
                TransactionDetails::new("DEP1", TransactionType::Deposit, "Initial deposit"),
                now,
            )
            .unwrap();

        let ops = operations_for::<Account>(
            Account::default().version(),
            &[opened, deposit],
            AccountEvent::account_id,
        )
        .unwrap();

        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.aggregate_id == account_id));
        assert_eq!(ops[0].expected_version, 0);
        assert_eq!(ops[1].expected_version, 1);
        assert_eq!(ops[1].event_type, "MoneyCredited");
    }
}
