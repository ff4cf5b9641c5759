//! Read-model rows
//!
//! Rows as stored in the projection tables. Enum columns are plain text;
//! the API layer turns them back into typed values.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct AccountView {
    pub id: Uuid,
    pub account_number: String,
    pub account_type: String,
    pub account_alias: Option<String>,
    pub balance: Decimal,
    pub hold_amount: Decimal,
    pub status: String,
    pub daily_withdrawal_date: Option<NaiveDate>,
    pub daily_withdrawal_used: Decimal,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountView {
    pub fn available_balance(&self) -> Decimal {
        self.balance - self.hold_amount
    }

    /// Withdrawals recorded for `date`; a stale date means nothing used yet
    pub fn daily_used_on(&self, date: NaiveDate) -> Decimal {
        match self.daily_withdrawal_date {
            Some(d) if d == date => self.daily_withdrawal_used,
            _ => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionView {
    pub transaction_id: String,
    pub account_id: Uuid,
    pub account_number: String,
    pub transaction_type: String,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub status: String,
    pub channel: String,
    pub reason_code: Option<String>,
    pub source_type: Option<String>,
    pub depositor_info: Option<String>,
    pub counterpart_account: Option<String>,
    pub counterpart_name: Option<String>,
    pub reference_id: Option<Uuid>,
    pub request_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransferView {
    pub id: Uuid,
    pub from_account_number: String,
    pub to_account_number: String,
    pub amount: Decimal,
    pub memo: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentView {
    pub id: Uuid,
    pub account_number: String,
    pub merchant_id: String,
    pub order_id: String,
    pub amount: Decimal,
    pub captured_amount: Decimal,
    pub refunded_amount: Decimal,
    pub gateway_reference: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn view(date: Option<NaiveDate>) -> AccountView {
        AccountView {
            id: Uuid::new_v4(),
            account_number: "1001234567890".to_string(),
            account_type: "CHECKING".to_string(),
            account_alias: None,
            balance: dec!(100.00),
            hold_amount: dec!(30.00),
            status: "ACTIVE".to_string(),
            daily_withdrawal_date: date,
            daily_withdrawal_used: dec!(20.00),
            version: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_balance() {
        assert_eq!(view(None).available_balance(), dec!(70.00));
    }

    #[test]
    fn test_daily_used_resets_on_new_date() {
        let today = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2026, 4, 30).unwrap();

        assert_eq!(view(Some(today)).daily_used_on(today), dec!(20.00));
        assert_eq!(view(Some(yesterday)).daily_used_on(today), Decimal::ZERO);
        assert_eq!(view(None).daily_used_on(today), Decimal::ZERO);
    }
}
