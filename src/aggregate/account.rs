//! Account Aggregate
//!
//! Account is the core aggregate for balances, payment holds and the daily
//! withdrawal allowance. It applies events to maintain current state and
//! generates events for commands.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{
    AccountEvent, AccountStatus, AccountType, Balance, DomainError, Money, TransactionDetails,
    TransactionType,
};

use super::Aggregate;

/// Withdrawals made on one UTC day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: Option<NaiveDate>,
    pub amount: Decimal,
}

impl DailyUsage {
    /// Amount withdrawn on `date`; usage from an earlier day counts as zero
    pub fn used_on(&self, date: NaiveDate) -> Decimal {
        match self.date {
            Some(d) if d == date => self.amount,
            _ => Decimal::ZERO,
        }
    }

    fn record(&mut self, date: NaiveDate, amount: Decimal) {
        let used = self.used_on(date);
        self.date = Some(date);
        self.amount = used + amount;
    }
}

/// Account Aggregate
///
/// State is derived from events, never directly mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    id: Uuid,
    account_number: String,
    account_type: AccountType,
    alias: Option<String>,

    /// Ledger balance (derived from events)
    balance: Balance,

    /// Funds reserved for authorized payments, by payment id
    holds: BTreeMap<Uuid, Decimal>,

    status: AccountStatus,
    daily_withdrawal: DailyUsage,

    /// Current version (number of events applied)
    version: i64,

    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            account_number: String::new(),
            account_type: AccountType::default(),
            alias: None,
            balance: Balance::zero(),
            holds: BTreeMap::new(),
            status: AccountStatus::Active,
            daily_withdrawal: DailyUsage::default(),
            version: 0,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Account {
    // =========================================================================
    // Commands
    // =========================================================================

    /// Open a new account and generate the opening event
    pub fn open(
        account_id: Uuid,
        account_number: String,
        account_type: AccountType,
        alias: Option<String>,
        now: DateTime<Utc>,
    ) -> (Self, AccountEvent) {
        let event = AccountEvent::AccountOpened {
            account_id,
            account_number,
            account_type,
            alias,
            opened_at: now,
        };

        let account = Self::default().apply(event.clone());
        (account, event)
    }

    /// Credit money to the account.
    ///
    /// Refunds are accepted on frozen accounts so a captured payment can
    /// always be returned; every other credit needs an ACTIVE account.
    pub fn credit(
        &self,
        amount: &Money,
        details: TransactionDetails,
        now: DateTime<Utc>,
    ) -> Result<AccountEvent, DomainError> {
        match details.transaction_type {
            TransactionType::Refund if self.status != AccountStatus::Inactive => {}
            _ => self.ensure_active()?,
        }

        self.balance.credit(amount)?;

        Ok(AccountEvent::MoneyCredited {
            account_id: self.id,
            amount: amount.value(),
            details,
            credited_at: now,
        })
    }

    /// Debit money from the account.
    ///
    /// Checks status, available balance (balance minus holds) and, for
    /// withdrawal-type movements, the daily withdrawal limit.
    pub fn debit(
        &self,
        amount: &Money,
        details: TransactionDetails,
        daily_limit: Decimal,
        now: DateTime<Utc>,
    ) -> Result<AccountEvent, DomainError> {
        self.ensure_active()?;
        self.ensure_available(amount)?;

        if details.transaction_type.is_withdrawal() {
            self.ensure_daily_allowance(amount, daily_limit, now.date_naive())?;
        }

        Ok(AccountEvent::MoneyDebited {
            account_id: self.id,
            amount: amount.value(),
            details,
            debited_at: now,
        })
    }

    /// Reserve funds for a payment authorization.
    ///
    /// The daily limit is checked here because capturing held funds
    /// never fails on it.
    pub fn hold(
        &self,
        payment_id: Uuid,
        amount: &Money,
        daily_limit: Decimal,
        now: DateTime<Utc>,
    ) -> Result<AccountEvent, DomainError> {
        self.ensure_active()?;

        if self.holds.contains_key(&payment_id) {
            return Err(DomainError::invalid_state(format!(
                "Payment {} already holds funds on this account",
                payment_id
            )));
        }

        self.ensure_available(amount)?;
        self.ensure_daily_allowance(amount, daily_limit, now.date_naive())?;

        Ok(AccountEvent::FundsHeld {
            account_id: self.id,
            payment_id,
            amount: amount.value(),
            held_at: now,
        })
    }

    /// Release a payment hold
    pub fn release_hold(
        &self,
        payment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AccountEvent, DomainError> {
        self.held_for(payment_id)?;

        Ok(AccountEvent::HoldReleased {
            account_id: self.id,
            payment_id,
            released_at: now,
        })
    }

    /// Debit the full held amount of a payment
    pub fn capture_hold(
        &self,
        payment_id: Uuid,
        details: TransactionDetails,
        now: DateTime<Utc>,
    ) -> Result<AccountEvent, DomainError> {
        let amount = self.held_for(payment_id)?;

        Ok(AccountEvent::HoldCaptured {
            account_id: self.id,
            payment_id,
            amount,
            details,
            captured_at: now,
        })
    }

    /// Change the account status. Returns `None` when nothing changes.
    pub fn change_status(
        &self,
        to: AccountStatus,
        now: DateTime<Utc>,
    ) -> Option<AccountEvent> {
        if self.status == to {
            return None;
        }

        Some(AccountEvent::StatusChanged {
            account_id: self.id,
            from: self.status,
            to,
            changed_at: now,
        })
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.status.is_active() {
            return Err(DomainError::InactiveAccount {
                status: self.status,
            });
        }
        Ok(())
    }

    fn ensure_available(&self, amount: &Money) -> Result<(), DomainError> {
        let available = self.available_balance();
        if available < amount.value() {
            return Err(DomainError::insufficient_balance(amount.value(), available));
        }
        Ok(())
    }

    fn ensure_daily_allowance(
        &self,
        amount: &Money,
        daily_limit: Decimal,
        today: NaiveDate,
    ) -> Result<(), DomainError> {
        let used = self.daily_withdrawal.used_on(today);
        if used + amount.value() > daily_limit {
            return Err(DomainError::DailyLimitExceeded {
                limit: daily_limit,
                used,
                requested: amount.value(),
            });
        }
        Ok(())
    }

    fn held_for(&self, payment_id: Uuid) -> Result<Decimal, DomainError> {
        self.holds.get(&payment_id).copied().ok_or_else(|| {
            DomainError::invalid_state(format!("No hold for payment {}", payment_id))
        })
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    /// Sum of all payment holds
    pub fn hold_amount(&self) -> Decimal {
        self.holds.values().copied().sum()
    }

    /// Balance minus holds
    pub fn available_balance(&self) -> Decimal {
        self.balance.value() - self.hold_amount()
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn daily_withdrawal(&self) -> &DailyUsage {
        &self.daily_withdrawal
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn apply_debit(&mut self, amount: Decimal, details: &TransactionDetails, at: DateTime<Utc>) {
        match Money::new(amount).and_then(|amt| self.balance.debit(&amt)) {
            Ok(new_balance) => self.balance = new_balance,
            Err(e) => {
                tracing::error!(
                    account_id = %self.id,
                    transaction_id = %details.transaction_id,
                    error = %e,
                    "Invalid debit during replay"
                );
                // Keep current balance to maintain consistency
                return;
            }
        }

        if details.transaction_type.is_withdrawal() {
            self.daily_withdrawal.record(at.date_naive(), amount);
        }
    }
}

// =========================================================================
// Event application
// =========================================================================

impl Aggregate for Account {
    type Event = AccountEvent;

    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            AccountEvent::AccountOpened {
                account_id,
                account_number,
                account_type,
                alias,
                opened_at,
            } => {
                self.id = account_id;
                self.account_number = account_number;
                self.account_type = account_type;
                self.alias = alias;
                self.balance = Balance::zero();
                self.status = AccountStatus::Active;
                self.created_at = Some(opened_at);
                self.updated_at = Some(opened_at);
            }

            AccountEvent::MoneyCredited {
                amount,
                details,
                credited_at,
                ..
            } => {
                match Money::new(amount).and_then(|amt| self.balance.credit(&amt)) {
                    Ok(new_balance) => self.balance = new_balance,
                    Err(e) => {
                        tracing::error!(
                            account_id = %self.id,
                            transaction_id = %details.transaction_id,
                            error = %e,
                            "Invalid credit during replay"
                        );
                    }
                }
                self.updated_at = Some(credited_at);
            }

            AccountEvent::MoneyDebited {
                amount,
                details,
                debited_at,
                ..
            } => {
                self.apply_debit(amount, &details, debited_at);
                self.updated_at = Some(debited_at);
            }

            AccountEvent::FundsHeld {
                payment_id,
                amount,
                held_at,
                ..
            } => {
                self.holds.insert(payment_id, amount);
                self.updated_at = Some(held_at);
            }

            AccountEvent::HoldReleased {
                payment_id,
                released_at,
                ..
            } => {
                self.holds.remove(&payment_id);
                self.updated_at = Some(released_at);
            }

            AccountEvent::HoldCaptured {
                payment_id,
                amount,
                details,
                captured_at,
                ..
            } => {
                self.holds.remove(&payment_id);
                self.apply_debit(amount, &details, captured_at);
                self.updated_at = Some(captured_at);
            }

            AccountEvent::StatusChanged { to, changed_at, .. } => {
                self.status = to;
                self.updated_at = Some(changed_at);
            }
        }

        self.version += 1;
        self
    }
}
