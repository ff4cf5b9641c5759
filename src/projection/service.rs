//! Projection Service
//!
//! Updates read-model tables from events.
//! This is the "P" in CQRS - projections for queries.
//!
//! Writers take the caller's transaction so events and projections commit
//! together; readers use the pool.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate, Payment, Transfer};
use crate::db;
use crate::domain::{AccountEvent, OperationContext};

use super::views::{AccountView, PaymentView, TransactionView, TransferView};

const ACCOUNT_NUMBER_CONSTRAINT: &str = "accounts_account_number_key";
const TRANSACTION_PK_CONSTRAINT: &str = "account_transactions_pkey";

/// Projection Service for updating read models
#[derive(Debug, Clone)]
pub struct ProjectionService {
    pool: PgPool,
}

impl ProjectionService {
    /// Create a new ProjectionService
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Project one account event.
    ///
    /// `account` is the aggregate state after the event was applied. The
    /// account row is rewritten from it, and balance movements add a row to
    /// the transaction history.
    pub async fn apply_account_event(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account: &Account,
        event: &AccountEvent,
        event_id: Uuid,
        context: &OperationContext,
    ) -> Result<(), ProjectionError> {
        self.upsert_account(tx, account).await?;

        if let Some((details, amount, at)) = event.transaction() {
            let balance_after = account.balance().value();
            let balance_before = match event {
                AccountEvent::MoneyCredited { .. } => balance_after - amount,
                _ => balance_after + amount,
            };

            let inserted = sqlx::query(
                r#"
                INSERT INTO account_transactions (
                    transaction_id, account_id, account_number, transaction_type,
                    amount, balance_before, balance_after, description,
                    reason_code, source_type, depositor_info,
                    counterpart_account, counterpart_name, reference_id,
                    request_id, idempotency_key, event_id, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                "#,
            )
            .bind(&details.transaction_id)
            .bind(account.id())
            .bind(account.account_number())
            .bind(details.transaction_type.as_str())
            .bind(amount)
            .bind(balance_before)
            .bind(balance_after)
            .bind(&details.description)
            .bind(&details.reason_code)
            .bind(&details.source_type)
            .bind(&details.depositor_info)
            .bind(&details.counterpart_account)
            .bind(&details.counterpart_name)
            .bind(details.reference_id)
            .bind(&context.request_id)
            .bind(&context.idempotency_key)
            .bind(event_id)
            .bind(at)
            .execute(&mut **tx)
            .await;

            if let Err(e) = inserted {
                return Err(match db::unique_violation(&e).as_deref() {
                    Some(TRANSACTION_PK_CONSTRAINT) => {
                        ProjectionError::DuplicateTransaction(details.transaction_id.clone())
                    }
                    _ => e.into(),
                });
            }
        }

        tracing::debug!(
            account_id = %account.id(),
            event_type = event.event_type(),
            version = account.version(),
            "Account projection updated"
        );

        Ok(())
    }

    async fn upsert_account(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account: &Account,
    ) -> Result<(), ProjectionError> {
        let created_at = account.created_at().unwrap_or_else(chrono::Utc::now);
        let updated_at = account.updated_at().unwrap_or(created_at);
        let usage = account.daily_withdrawal();

        let result = sqlx::query(
            r#"
            INSERT INTO accounts (
                id, account_number, account_type, account_alias, balance, hold_amount,
                status, daily_withdrawal_date, daily_withdrawal_used, version,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                balance = EXCLUDED.balance,
                hold_amount = EXCLUDED.hold_amount,
                status = EXCLUDED.status,
                daily_withdrawal_date = EXCLUDED.daily_withdrawal_date,
                daily_withdrawal_used = EXCLUDED.daily_withdrawal_used,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account.id())
        .bind(account.account_number())
        .bind(account.account_type().as_str())
        .bind(account.alias())
        .bind(account.balance().value())
        .bind(account.hold_amount())
        .bind(account.status().as_str())
        .bind(usage.date)
        .bind(usage.amount)
        .bind(account.version())
        .bind(created_at)
        .bind(updated_at)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(match db::unique_violation(&e).as_deref() {
                Some(ACCOUNT_NUMBER_CONSTRAINT) => {
                    ProjectionError::DuplicateAccount(account.account_number().to_string())
                }
                _ => e.into(),
            }),
        }
    }

    pub async fn get_account(&self, account_number: &str) -> Result<Option<AccountView>, ProjectionError> {
        let account = sqlx::query_as::<_, AccountView>(
            r#"
            SELECT id, account_number, account_type, account_alias, balance, hold_amount,
                   status, daily_withdrawal_date, daily_withdrawal_used, version,
                   created_at, updated_at
            FROM accounts
            WHERE account_number = $1
            "#,
        )
        .bind(account_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Resolve an account number to its aggregate id
    pub async fn find_account_id(&self, account_number: &str) -> Result<Option<Uuid>, ProjectionError> {
        let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM accounts WHERE account_number = $1")
            .bind(account_number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(id)
    }

    pub async fn account_number_exists(&self, account_number: &str) -> Result<bool, ProjectionError> {
        Ok(self.find_account_id(account_number).await?.is_some())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn transaction_exists(&self, transaction_id: &str) -> Result<bool, ProjectionError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM account_transactions WHERE transaction_id = $1)",
        )
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    pub async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionView>, ProjectionError> {
        let transaction = sqlx::query_as::<_, TransactionView>(
            r#"
            SELECT transaction_id, account_id, account_number, transaction_type, amount,
                   balance_before, balance_after, description, status, channel,
                   reason_code, source_type, depositor_info, counterpart_account,
                   counterpart_name, reference_id, request_id, idempotency_key, created_at
            FROM account_transactions
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    /// Transaction history of an account, newest first
    pub async fn list_transactions(
        &self,
        account_number: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionView>, ProjectionError> {
        let transactions = sqlx::query_as::<_, TransactionView>(
            r#"
            SELECT transaction_id, account_id, account_number, transaction_type, amount,
                   balance_before, balance_after, description, status, channel,
                   reason_code, source_type, depositor_info, counterpart_account,
                   counterpart_name, reference_id, request_id, idempotency_key, created_at
            FROM account_transactions
            WHERE account_number = $1
            ORDER BY created_at DESC, transaction_id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_number)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    pub async fn apply_transfer(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        transfer: &Transfer,
    ) -> Result<(), ProjectionError> {
        let status = transfer
            .status()
            .ok_or_else(|| ProjectionError::InvalidState(format!("transfer {} has no status", transfer.id())))?;

        sqlx::query(
            r#"
            INSERT INTO transfers (
                id, from_account_number, to_account_number, amount, memo,
                status, failure_reason, transaction_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(transfer.id())
        .bind(transfer.from_account_number())
        .bind(transfer.to_account_number())
        .bind(transfer.amount())
        .bind(transfer.memo())
        .bind(status.as_str())
        .bind(transfer.failure_reason().map(|r| r.as_str()))
        .bind(transfer.transaction_id())
        .bind(transfer.created_at().unwrap_or_else(chrono::Utc::now))
        .execute(&mut **tx)
        .await?;

        tracing::debug!(
            transfer_id = %transfer.id(),
            status = %status,
            "Transfer projection updated"
        );

        Ok(())
    }

    pub async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<TransferView>, ProjectionError> {
        let transfer = sqlx::query_as::<_, TransferView>(
            r#"
            SELECT id, from_account_number, to_account_number, amount, memo,
                   status, failure_reason, transaction_id, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transfer)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    pub async fn apply_payment(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
    ) -> Result<(), ProjectionError> {
        let created_at = payment.created_at().unwrap_or_else(chrono::Utc::now);

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, account_number, merchant_id, order_id, amount, captured_amount,
                refunded_amount, gateway_reference, description, status, failure_reason,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                captured_amount = EXCLUDED.captured_amount,
                refunded_amount = EXCLUDED.refunded_amount,
                status = EXCLUDED.status,
                failure_reason = EXCLUDED.failure_reason,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(payment.id())
        .bind(payment.account_number())
        .bind(payment.merchant_id())
        .bind(payment.order_id())
        .bind(payment.amount())
        .bind(payment.captured_amount())
        .bind(payment.refunded_amount())
        .bind(payment.gateway_reference())
        .bind(payment.description())
        .bind(payment.status().as_str())
        .bind(payment.failure_reason())
        .bind(created_at)
        .bind(payment.updated_at().unwrap_or(created_at))
        .execute(&mut **tx)
        .await?;

        tracing::debug!(
            payment_id = %payment.id(),
            status = %payment.status(),
            "Payment projection updated"
        );

        Ok(())
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<PaymentView>, ProjectionError> {
        let payment = sqlx::query_as::<_, PaymentView>(
            r#"
            SELECT id, account_number, merchant_id, order_id, amount, captured_amount,
                   refunded_amount, gateway_reference, description, status, failure_reason,
                   created_at, updated_at
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }
}

/// Projection errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Account number already exists: {0}")]
    DuplicateAccount(String),

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Invalid projection state: {0}")]
    InvalidState(String),
}
