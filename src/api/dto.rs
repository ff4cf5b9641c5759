//! Request and response bodies
//!
//! Requests arrive with every field optional so that a missing value is
//! reported as a field error instead of a JSON error. `into_command` checks
//! the fields and builds the typed command.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate, Payment};
use crate::config::TransactionLimits;
use crate::domain::{
    is_valid_transaction_id, AccountNumber, AccountStatus, AccountType, Money,
};
use crate::error::AppError;
use crate::handlers::{
    AuthorizePaymentCommand, DepositCommand, OpenAccountCommand, RefundPaymentCommand,
    TransferCommand, WithdrawCommand,
};
use crate::projection::{AccountView, PaymentView, TransactionView, TransferView};

use super::response::FieldError;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 1000;

// =========================================================================
// Field checks
// =========================================================================

/// Collects field errors; `finish` fails when any were found
#[derive(Debug, Default)]
pub struct FieldChecks {
    errors: Vec<FieldError>,
}

impl FieldChecks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required<T: Clone>(&mut self, field: &str, value: &Option<T>) -> Option<T> {
        if value.is_none() {
            self.errors.push(FieldError::new(field, "is required"));
        }
        value.clone()
    }

    /// Required text of `min..=max` characters after trimming
    pub fn text(&mut self, field: &str, value: &Option<String>, min: usize, max: usize) -> Option<String> {
        match value {
            None => {
                self.errors.push(FieldError::new(field, "is required"));
                None
            }
            Some(v) => self.length(field, v, min, max),
        }
    }

    /// Optional text of at most `max` characters; blank counts as absent
    pub fn optional_text(&mut self, field: &str, value: &Option<String>, max: usize) -> Option<String> {
        match value {
            Some(v) if !v.trim().is_empty() => self.length(field, v, 1, max),
            _ => None,
        }
    }

    pub fn transaction_id(&mut self, value: &Option<String>) -> Option<String> {
        match value {
            Some(id) if !is_valid_transaction_id(id) => {
                self.errors.push(
                    FieldError::new(
                        "transaction_id",
                        "must be 1-50 characters of letters, digits, '_' or '-'",
                    )
                    .rejected(id),
                );
                None
            }
            other => other.clone(),
        }
    }

    fn length(&mut self, field: &str, value: &str, min: usize, max: usize) -> Option<String> {
        let trimmed = value.trim();
        let len = trimmed.chars().count();
        if len < min || len > max {
            self.errors.push(
                FieldError::new(field, format!("must be {}-{} characters", min, max)).rejected(value),
            );
            return None;
        }
        Some(trimmed.to_string())
    }

    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

fn account_number(field: &str, value: &str) -> Result<AccountNumber, AppError> {
    AccountNumber::parse(value).map_err(|e| {
        tracing::debug!(field, error = %e, "Rejected account number");
        AppError::from(e)
    })
}

// =========================================================================
// Account requests
// =========================================================================

#[derive(Debug, Default, Deserialize)]
pub struct OpenAccountRequest {
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub account_alias: Option<String>,
    #[serde(default)]
    pub initial_deposit: Option<Decimal>,
}

impl OpenAccountRequest {
    pub fn into_command(self) -> Result<OpenAccountCommand, AppError> {
        let mut checks = FieldChecks::new();

        let account_type = match self.account_type.as_deref() {
            None => AccountType::default(),
            Some(raw) => match raw.parse::<AccountType>() {
                Ok(t) => t,
                Err(_) => {
                    checks.push(
                        FieldError::new("account_type", "must be CHECKING, SAVINGS or INVESTMENT")
                            .rejected(raw),
                    );
                    AccountType::default()
                }
            },
        };
        let alias = checks.optional_text("account_alias", &self.account_alias, 50);
        checks.finish()?;

        let mut command = OpenAccountCommand::new(account_type);
        if let Some(number) = self.account_number.as_deref() {
            command = command.with_account_number(account_number("account_number", number)?);
        }
        if let Some(alias) = alias {
            command = command.with_alias(alias);
        }
        if let Some(amount) = self.initial_deposit {
            command = command.with_initial_deposit(Money::new(amount)?);
        }

        Ok(command)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DepositRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub depositor_info: Option<String>,
}

impl DepositRequest {
    pub fn into_command(self, account: &str) -> Result<DepositCommand, AppError> {
        let mut checks = FieldChecks::new();
        let amount = checks.required("amount", &self.amount);
        let description = checks.text("description", &self.description, 1, 100);
        let transaction_id = checks.transaction_id(&self.transaction_id);
        let source_type = checks.optional_text("source_type", &self.source_type, 20);
        let depositor_info = checks.optional_text("depositor_info", &self.depositor_info, 50);
        checks.finish()?;

        Ok(DepositCommand {
            account_number: account_number("accountNumber", account)?,
            amount: Money::new(amount.unwrap_or_default())?,
            description: description.unwrap_or_default(),
            transaction_id,
            source_type,
            depositor_info,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WithdrawRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub reason_code: Option<String>,
}

impl WithdrawRequest {
    pub fn into_command(self, account: &str) -> Result<WithdrawCommand, AppError> {
        let mut checks = FieldChecks::new();
        let amount = checks.required("amount", &self.amount);
        let description = checks.text("description", &self.description, 1, 100);
        let transaction_id = checks.transaction_id(&self.transaction_id);
        let reason_code = checks.optional_text("reason_code", &self.reason_code, 20);
        checks.finish()?;

        Ok(WithdrawCommand {
            account_number: account_number("accountNumber", account)?,
            amount: Money::new(amount.unwrap_or_default())?,
            description: description.unwrap_or_default(),
            transaction_id,
            reason_code,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub status: Option<String>,
}

impl StatusQuery {
    pub fn status(&self) -> Result<AccountStatus, AppError> {
        match self.status.as_deref() {
            None => Err(AppError::field("status", "is required")),
            Some(raw) => raw.parse::<AccountStatus>().map_err(|_| {
                AppError::Validation(vec![FieldError::new(
                    "status",
                    "must be ACTIVE, INACTIVE or FROZEN",
                )
                .rejected(raw)])
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl PageQuery {
    /// `(limit, offset)`, limit clamped to `1..=MAX_PAGE_SIZE`
    pub fn bounds(&self) -> Result<(i64, i64), AppError> {
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::Validation(vec![
                FieldError::new("offset", "must not be negative").rejected(offset),
            ]));
        }
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        Ok((limit, offset))
    }
}

// =========================================================================
// Transfer / payment requests
// =========================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TransferRequest {
    #[serde(default)]
    pub from_account_number: Option<String>,
    #[serde(default)]
    pub to_account_number: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

impl TransferRequest {
    pub fn into_command(self) -> Result<TransferCommand, AppError> {
        let mut checks = FieldChecks::new();
        let from = checks.required("from_account_number", &self.from_account_number);
        let to = checks.required("to_account_number", &self.to_account_number);
        let amount = checks.required("amount", &self.amount);
        let memo = checks.optional_text("memo", &self.memo, 100);
        let transaction_id = checks.transaction_id(&self.transaction_id);
        checks.finish()?;

        let mut command = TransferCommand::new(
            account_number("from_account_number", &from.unwrap_or_default())?,
            account_number("to_account_number", &to.unwrap_or_default())?,
            Money::new(amount.unwrap_or_default())?,
        );
        if let Some(memo) = memo {
            command = command.with_memo(memo);
        }
        if let Some(id) = transaction_id {
            command = command.with_transaction_id(id);
        }

        Ok(command)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizePaymentRequest {
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AuthorizePaymentRequest {
    pub fn into_command(self) -> Result<AuthorizePaymentCommand, AppError> {
        let mut checks = FieldChecks::new();
        let number = checks.required("account_number", &self.account_number);
        let merchant_id = checks.text("merchant_id", &self.merchant_id, 1, 50);
        let order_id = checks.text("order_id", &self.order_id, 1, 50);
        let amount = checks.required("amount", &self.amount);
        let description = checks.optional_text("description", &self.description, 100);
        checks.finish()?;

        Ok(AuthorizePaymentCommand {
            account_number: account_number("account_number", &number.unwrap_or_default())?,
            merchant_id: merchant_id.unwrap_or_default(),
            order_id: order_id.unwrap_or_default(),
            amount: Money::new(amount.unwrap_or_default())?,
            description,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl RefundRequest {
    pub fn into_command(self, payment_id: Uuid) -> Result<RefundPaymentCommand, AppError> {
        let amount = self.amount.map(Money::new).transpose()?;
        Ok(RefundPaymentCommand { payment_id, amount })
    }
}

// =========================================================================
// Responses
// =========================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AccountResponse {
    pub account_id: Uuid,
    pub account_number: String,
    pub account_type: String,
    pub account_alias: Option<String>,
    pub balance: Decimal,
    pub available_balance: Decimal,
    pub hold_amount: Decimal,
    pub status: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        let created_at = account.created_at().unwrap_or_else(Utc::now);
        Self {
            account_id: account.id(),
            account_number: account.account_number().to_string(),
            account_type: account.account_type().to_string(),
            account_alias: account.alias().map(str::to_string),
            balance: account.balance().value(),
            available_balance: account.available_balance(),
            hold_amount: account.hold_amount(),
            status: account.status().to_string(),
            version: account.version(),
            created_at,
            updated_at: account.updated_at().unwrap_or(created_at),
        }
    }
}

impl From<AccountView> for AccountResponse {
    fn from(view: AccountView) -> Self {
        Self {
            account_id: view.id,
            available_balance: view.available_balance(),
            account_number: view.account_number,
            account_type: view.account_type,
            account_alias: view.account_alias,
            balance: view.balance,
            hold_amount: view.hold_amount,
            status: view.status,
            version: view.version,
            created_at: view.created_at,
            updated_at: view.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub account_number: String,
    pub balance: Decimal,
    pub available_balance: Decimal,
    pub hold_amount: Decimal,
    pub status: String,
    pub last_updated: DateTime<Utc>,
    pub retrieved_at: DateTime<Utc>,
    pub daily_withdrawal_limit: Decimal,
    pub daily_withdrawal_used: Decimal,
    pub daily_withdrawal_available: Decimal,
}

impl BalanceResponse {
    pub fn new(view: AccountView, limits: &TransactionLimits, now: DateTime<Utc>) -> Self {
        let today: NaiveDate = now.date_naive();
        let used = view.daily_used_on(today);
        let available = (limits.daily_withdrawal_limit - used).max(Decimal::ZERO);

        Self {
            balance: view.balance,
            available_balance: view.available_balance(),
            hold_amount: view.hold_amount,
            last_updated: view.updated_at,
            retrieved_at: now,
            daily_withdrawal_limit: limits.daily_withdrawal_limit,
            daily_withdrawal_used: used,
            daily_withdrawal_available: available,
            account_number: view.account_number,
            status: view.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: String,
    pub account_number: String,
    pub transaction_type: String,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub status: String,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depositor_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<TransactionView> for TransactionResponse {
    fn from(view: TransactionView) -> Self {
        Self {
            transaction_id: view.transaction_id,
            account_number: view.account_number,
            transaction_type: view.transaction_type,
            amount: view.amount,
            balance_before: view.balance_before,
            balance_after: view.balance_after,
            description: view.description,
            status: view.status,
            channel: view.channel,
            reason_code: view.reason_code,
            source_type: view.source_type,
            depositor_info: view.depositor_info,
            counterpart_account: view.counterpart_account,
            counterpart_name: view.counterpart_name,
            reference_id: view.reference_id,
            created_at: view.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub account_number: String,
    pub limit: i64,
    pub offset: i64,
    pub transactions: Vec<TransactionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferResponse {
    pub transfer_id: Uuid,
    pub from_account_number: String,
    pub to_account_number: String,
    pub amount: Decimal,
    pub memo: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<TransferView> for TransferResponse {
    fn from(view: TransferView) -> Self {
        Self {
            transfer_id: view.id,
            from_account_number: view.from_account_number,
            to_account_number: view.to_account_number,
            amount: view.amount,
            memo: view.memo,
            status: view.status,
            failure_reason: view.failure_reason,
            transaction_id: view.transaction_id,
            created_at: view.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub account_number: String,
    pub merchant_id: String,
    pub order_id: String,
    pub amount: Decimal,
    pub captured_amount: Decimal,
    pub refunded_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        let created_at = payment.created_at().unwrap_or_else(Utc::now);
        Self {
            payment_id: payment.id(),
            account_number: payment.account_number().to_string(),
            merchant_id: payment.merchant_id().to_string(),
            order_id: payment.order_id().to_string(),
            amount: payment.amount(),
            captured_amount: payment.captured_amount(),
            refunded_amount: payment.refunded_amount(),
            gateway_reference: payment.gateway_reference().map(str::to_string),
            description: payment.description().map(str::to_string),
            status: payment.status().to_string(),
            failure_reason: payment.failure_reason().map(str::to_string),
            created_at,
            updated_at: payment.updated_at().unwrap_or(created_at),
        }
    }
}

impl From<PaymentView> for PaymentResponse {
    fn from(view: PaymentView) -> Self {
        Self {
            payment_id: view.id,
            account_number: view.account_number,
            merchant_id: view.merchant_id,
            order_id: view.order_id,
            amount: view.amount,
            captured_amount: view.captured_amount,
            refunded_amount: view.refunded_amount,
            gateway_reference: view.gateway_reference,
            description: view.description,
            status: view.status,
            failure_reason: view.failure_reason,
            created_at: view.created_at,
            updated_at: view.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use rust_decimal_macros::dec;

    fn field_names(err: AppError) -> Vec<String> {
        match err {
            AppError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_deposit_request_missing_fields() {
        let err = DepositRequest::default().into_command("1001234567890").unwrap_err();
        assert_eq!(field_names(err), vec!["amount", "description"]);
    }

    #[test]
    fn test_deposit_request_lengths() {
        let request = DepositRequest {
            amount: Some(dec!(10)),
            description: Some("salary".to_string()),
            source_type: Some("x".repeat(21)),
            depositor_info: Some("y".repeat(51)),
            transaction_id: Some("bad id!".to_string()),
        };
        let err = request.into_command("1001234567890").unwrap_err();
        assert_eq!(
            field_names(err),
            vec!["transaction_id", "source_type", "depositor_info"]
        );
    }

    #[test]
    fn test_deposit_request_builds_command() {
        let request: DepositRequest = serde_json::from_str(
            r#"{"amount": "12.5", "description": " salary ", "transaction_id": "T-1"}"#,
        )
        .unwrap();
        let command = request.into_command("1001234567890").unwrap();

        assert_eq!(command.amount.value(), dec!(12.50));
        assert_eq!(command.description, "salary");
        assert_eq!(command.transaction_id.as_deref(), Some("T-1"));
    }

    #[test]
    fn test_invalid_amount_and_account_number_map_to_domain_errors() {
        let request = WithdrawRequest {
            amount: Some(dec!(-1)),
            description: Some("cash".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            request.into_command("1001234567890"),
            Err(AppError::Domain(DomainError::InvalidAmount(_)))
        ));

        let request = WithdrawRequest {
            amount: Some(dec!(1)),
            description: Some("cash".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            request.into_command("12ab"),
            Err(AppError::Domain(DomainError::InvalidAccountNumber(_)))
        ));
    }

    #[test]
    fn test_open_account_request_defaults_and_type() {
        let command = OpenAccountRequest::default().into_command().unwrap();
        assert_eq!(command.account_type, AccountType::Checking);
        assert!(command.account_number.is_none());

        let request = OpenAccountRequest {
            account_type: Some("GOLD".to_string()),
            ..Default::default()
        };
        assert_eq!(field_names(request.into_command().unwrap_err()), vec!["account_type"]);
    }

    #[test]
    fn test_status_query() {
        let query = StatusQuery {
            status: Some("FROZEN".to_string()),
        };
        assert_eq!(query.status().unwrap(), AccountStatus::Frozen);
        assert!(StatusQuery::default().status().is_err());
        assert!(StatusQuery {
            status: Some("frozen".to_string())
        }
        .status()
        .is_err());
    }

    #[test]
    fn test_page_query_bounds() {
        assert_eq!(PageQuery::default().bounds().unwrap(), (50, 0));
        let query = PageQuery {
            limit: Some(5000),
            offset: Some(10),
        };
        assert_eq!(query.bounds().unwrap(), (1000, 10));
        let query = PageQuery {
            limit: Some(0),
            offset: Some(-1),
        };
        assert!(query.bounds().is_err());
    }

    #[test]
    fn test_transfer_request_requires_both_accounts() {
        let request = TransferRequest {
            amount: Some(dec!(1)),
            ..Default::default()
        };
        assert_eq!(
            field_names(request.into_command().unwrap_err()),
            vec!["from_account_number", "to_account_number"]
        );
    }

    #[test]
    fn test_refund_request_amount_is_optional() {
        let payment_id = Uuid::new_v4();
        let command = RefundRequest::default().into_command(payment_id).unwrap();
        assert!(command.amount.is_none());

        let command = RefundRequest {
            amount: Some(dec!(3)),
        }
        .into_command(payment_id)
        .unwrap();
        assert_eq!(command.amount.unwrap().value(), dec!(3.00));
    }

    #[test]
    fn test_balance_response_daily_figures() {
        let now = Utc::now();
        let view = AccountView {
            id: Uuid::new_v4(),
            account_number: "1001234567890".to_string(),
            account_type: "CHECKING".to_string(),
            account_alias: None,
            balance: dec!(100.00),
            hold_amount: dec!(25.00),
            status: "ACTIVE".to_string(),
            daily_withdrawal_date: Some(now.date_naive()),
            daily_withdrawal_used: dec!(900.00),
            version: 4,
            created_at: now,
            updated_at: now,
        };
        let limits = TransactionLimits {
            daily_withdrawal_limit: dec!(1000),
            max_transaction_amount: dec!(500),
        };

        let response = BalanceResponse::new(view, &limits, now);
        assert_eq!(response.available_balance, dec!(75.00));
        assert_eq!(response.daily_withdrawal_used, dec!(900.00));
        assert_eq!(response.daily_withdrawal_available, dec!(100));
    }
}
