//! Account Handler
//!
//! Opens accounts, moves money in and out, and changes account status.

use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate};
use crate::cache::AccountCache;
use crate::config::TransactionLimits;
use crate::domain::{
    generate_transaction_id, AccountEvent, AccountNumber, DomainError, Money, OperationContext,
    TransactionDetails, TransactionType,
};
use crate::error::AppError;

use super::recorder::EventRecorder;
use super::retry::with_conflict_retry;
use super::{
    ChangeStatusCommand, DepositCommand, OpenAccountCommand, TransactionReceipt, WithdrawCommand,
};

/// Attempts at finding a free generated account number
const ACCOUNT_NUMBER_ATTEMPTS: usize = 5;

const INITIAL_DEPOSIT_DESCRIPTION: &str = "Initial deposit";

/// Handler for account commands
#[derive(Clone)]
pub struct AccountHandler {
    recorder: EventRecorder,
    limits: TransactionLimits,
}

impl AccountHandler {
    pub fn new(pool: PgPool, cache: Arc<dyn AccountCache>, limits: TransactionLimits) -> Self {
        Self {
            recorder: EventRecorder::new(pool, cache),
            limits,
        }
    }

    // =========================================================================
    // Open
    // =========================================================================

    pub async fn open(
        &self,
        command: OpenAccountCommand,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        if let Some(amount) = &command.initial_deposit {
            ensure_within_limit(amount, &self.limits)?;
        }

        let account_number = match command.account_number {
            Some(number) => {
                if self.recorder.projection().account_number_exists(number.as_str()).await? {
                    return Err(DomainError::DuplicateAccount(number.to_string()).into());
                }
                number
            }
            None => self.free_account_number().await?,
        };

        let now = Utc::now();
        let account_id = Uuid::new_v4();
        let (opened_account, opened) = Account::open(
            account_id,
            account_number.to_string(),
            command.account_type,
            command.alias,
            now,
        );

        let mut events = vec![opened];
        if let Some(amount) = &command.initial_deposit {
            let details = TransactionDetails::new(
                generate_transaction_id(TransactionType::Deposit, now),
                TransactionType::Deposit,
                INITIAL_DEPOSIT_DESCRIPTION,
            );
            events.push(opened_account.credit(amount, details, now)?);
        }

        // A concurrent open of the same number fails on the unique constraint
        let mut tx = self.recorder.begin().await?;
        let account = self
            .recorder
            .record_account(&mut tx, Account::default(), events, context)
            .await?;
        tx.commit().await?;

        self.recorder.account_committed(&account).await;

        tracing::info!(
            account_id = %account.id(),
            account_number = %account_number.masked(),
            account_type = %account.account_type(),
            initial_balance = %account.balance(),
            "Account opened"
        );

        Ok(account)
    }

    async fn free_account_number(&self) -> Result<AccountNumber, AppError> {
        for _ in 0..ACCOUNT_NUMBER_ATTEMPTS {
            let candidate = AccountNumber::generate();
            if !self.recorder.projection().account_number_exists(candidate.as_str()).await? {
                return Ok(candidate);
            }
        }
        Err(AppError::Internal("could not generate a free account number".to_string()))
    }

    // =========================================================================
    // Deposit / Withdraw
    // =========================================================================

    pub async fn deposit(
        &self,
        command: DepositCommand,
        context: &OperationContext,
    ) -> Result<TransactionReceipt, AppError> {
        ensure_within_limit(&command.amount, &self.limits)?;

        let mut details = TransactionDetails::new(
            self.claim_transaction_id(command.transaction_id.clone(), TransactionType::Deposit)
                .await?,
            TransactionType::Deposit,
            command.description.clone(),
        );
        details.source_type = command.source_type.clone();
        details.depositor_info = command.depositor_info.clone();

        with_conflict_retry("deposit", || {
            self.try_credit(&command.account_number, &command.amount, details.clone(), context)
        })
        .await
    }

    pub async fn withdraw(
        &self,
        command: WithdrawCommand,
        context: &OperationContext,
    ) -> Result<TransactionReceipt, AppError> {
        ensure_within_limit(&command.amount, &self.limits)?;

        let mut details = TransactionDetails::new(
            self.claim_transaction_id(command.transaction_id.clone(), TransactionType::Withdraw)
                .await?,
            TransactionType::Withdraw,
            command.description.clone(),
        );
        details.reason_code = command.reason_code.clone();

        with_conflict_retry("withdraw", || {
            self.try_debit(&command.account_number, &command.amount, details.clone(), context)
        })
        .await
    }

    async fn try_credit(
        &self,
        account_number: &AccountNumber,
        amount: &Money,
        details: TransactionDetails,
        context: &OperationContext,
    ) -> Result<TransactionReceipt, AppError> {
        let account = self.recorder.load_account(account_number.as_str()).await?;
        let now = Utc::now();
        let event = account.credit(amount, details.clone(), now)?;

        self.commit_movement(account, event, &details, amount, context).await
    }

    async fn try_debit(
        &self,
        account_number: &AccountNumber,
        amount: &Money,
        details: TransactionDetails,
        context: &OperationContext,
    ) -> Result<TransactionReceipt, AppError> {
        let account = self.recorder.load_account(account_number.as_str()).await?;
        let now = Utc::now();
        let event = account.debit(amount, details.clone(), self.limits.daily_withdrawal_limit, now)?;

        self.commit_movement(account, event, &details, amount, context).await
    }

    async fn commit_movement(
        &self,
        account: Account,
        event: AccountEvent,
        details: &TransactionDetails,
        amount: &Money,
        context: &OperationContext,
    ) -> Result<TransactionReceipt, AppError> {
        let at = event
            .transaction()
            .map(|(_, _, at)| at)
            .unwrap_or_else(Utc::now);

        let mut tx = self.recorder.begin().await?;
        let account = self
            .recorder
            .record_account(&mut tx, account, vec![event], context)
            .await?;
        tx.commit().await?;

        self.recorder.account_committed(&account).await;

        let receipt = TransactionReceipt::from_account(&account, details, amount.value(), at);

        tracing::info!(
            account_id = %account.id(),
            transaction_id = %receipt.transaction_id,
            transaction_type = %receipt.transaction_type,
            amount = %receipt.amount,
            balance_after = %receipt.balance_after,
            "Transaction recorded"
        );

        Ok(receipt)
    }

    /// Client supplied id if still free, a generated one otherwise
    async fn claim_transaction_id(
        &self,
        requested: Option<String>,
        kind: TransactionType,
    ) -> Result<String, AppError> {
        match requested {
            Some(id) => {
                if self.recorder.projection().transaction_exists(&id).await? {
                    return Err(DomainError::DuplicateTransaction { transaction_id: id }.into());
                }
                Ok(id)
            }
            None => Ok(generate_transaction_id(kind, Utc::now())),
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Change the account status. Setting the current status again returns
    /// the account unchanged.
    pub async fn change_status(
        &self,
        command: ChangeStatusCommand,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        with_conflict_retry("change_status", || async {
            let account = self
                .recorder
                .load_account(command.account_number.as_str())
                .await?;
            let from = account.status();

            let event = match account.change_status(command.status, Utc::now()) {
                Some(event) => event,
                None => return Ok(account),
            };

            let mut tx = self.recorder.begin().await?;
            let account = self
                .recorder
                .record_account(&mut tx, account, vec![event], context)
                .await?;
            tx.commit().await?;

            self.recorder.account_committed(&account).await;

            tracing::info!(
                account_id = %account.id(),
                from = %from,
                to = %account.status(),
                "Account status changed"
            );

            Ok(account)
        })
        .await
    }
}

/// Reject single operations above the configured maximum
pub(crate) fn ensure_within_limit(amount: &Money, limits: &TransactionLimits) -> Result<(), DomainError> {
    if amount.value() > limits.max_transaction_amount {
        return Err(DomainError::InvalidAmount(format!(
            "Amount {} exceeds the maximum of {}",
            amount, limits.max_transaction_amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ensure_within_limit() {
        let limits = TransactionLimits {
            daily_withdrawal_limit: dec!(1000),
            max_transaction_amount: dec!(500.00),
        };

        assert!(ensure_within_limit(&Money::new(dec!(500.00)).unwrap(), &limits).is_ok());
        assert!(matches!(
            ensure_within_limit(&Money::new(dec!(500.01)).unwrap(), &limits),
            Err(DomainError::InvalidAmount(_))
        ));
    }
}
