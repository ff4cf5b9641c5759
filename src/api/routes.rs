//! API Routes
//!
//! HTTP endpoint definitions. Every body is wrapped in the response
//! envelope; POST commands honour the Idempotency-Key header.

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Extension, OriginalUri, Path, Query, State},
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::future::Future;
use uuid::Uuid;

use crate::domain::{AccountNumber, DomainError, OperationContext};
use crate::error::AppError;
use crate::handlers::ChangeStatusCommand;
use crate::idempotency::{Claim, IdempotencyRepository};

use super::dto::{
    AccountResponse, AuthorizePaymentRequest, BalanceResponse, DepositRequest, OpenAccountRequest,
    PageQuery, PaymentResponse, RefundRequest, StatusQuery, TransactionPage, TransactionResponse,
    TransferRequest, TransferResponse, WithdrawRequest,
};
use super::middleware::AuthenticatedApiKey;
use super::response::{ApiReply, ApiResponse, FieldError};
use super::state::AppState;

pub const ACCOUNTS_READ: &str = "accounts:read";
pub const ACCOUNTS_WRITE: &str = "accounts:write";
pub const TRANSFERS_READ: &str = "transfers:read";
pub const TRANSFERS_WRITE: &str = "transfers:write";
pub const PAYMENTS_READ: &str = "payments:read";
pub const PAYMENTS_WRITE: &str = "payments:write";

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Accounts
        .route("/accounts", post(open_account))
        .route("/accounts/transactions/:transaction_id", get(get_transaction))
        .route("/accounts/:account_number", get(get_account))
        .route("/accounts/:account_number/balance", get(get_balance))
        .route("/accounts/:account_number/status", patch(change_status))
        .route("/accounts/:account_number/deposit", post(deposit))
        .route("/accounts/:account_number/withdraw", post(withdraw))
        .route("/accounts/:account_number/transactions", get(list_transactions))
        // Transfers
        .route("/transfers", post(transfer))
        .route("/transfers/:transfer_id", get(get_transfer))
        // Payments
        .route("/payments", post(authorize_payment))
        .route("/payments/:payment_id", get(get_payment))
        .route("/payments/:payment_id/capture", post(capture_payment))
        .route("/payments/:payment_id/cancel", post(cancel_payment))
        .route("/payments/:payment_id/refund", post(refund_payment))
}

// =========================================================================
// Helpers
// =========================================================================

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::InvalidJson("request body is required".to_string()));
    }
    serde_json::from_slice(body).map_err(|e| AppError::InvalidJson(e.to_string()))
}

/// Like `parse_body`, but an empty body means all defaults
fn parse_optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

fn parse_id(field: &str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| {
        AppError::Validation(vec![FieldError::new(field, "must be a UUID").rejected(raw)])
    })
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query
        .map(|Query(q)| q)
        .map_err(|rejection| AppError::field("query", rejection.body_text()))
}

fn success<T: serde::Serialize>(
    context: &OperationContext,
    message: &str,
    data: T,
) -> ApiResponse<T> {
    ApiResponse::success(message, data).with_request_id(context.request_id.clone())
}

/// Run a POST command under its Idempotency-Key, if the client sent one.
///
/// A completed key replays the stored response. Only successful responses
/// are stored; a failed command releases the key so the client can retry.
async fn idempotent<Fut>(
    state: &AppState,
    context: &OperationContext,
    path: &str,
    body: &[u8],
    command: Fut,
) -> Result<ApiReply, AppError>
where
    Fut: Future<Output = Result<ApiReply, AppError>>,
{
    let key = match context.idempotency_key.as_deref() {
        Some(key) => key,
        None => return command.await,
    };

    IdempotencyRepository::validate_key(key)?;
    let request_hash = IdempotencyRepository::compute_request_hash("POST", path, body);

    if let Claim::Completed { status, body } =
        state.idempotency.start_processing(key, &request_hash).await?
    {
        tracing::info!(idempotency_key = %key, path, "Replaying stored response");
        return Ok(ApiReply::replay(status, body));
    }

    match command.await {
        Ok(reply) => {
            if let Err(e) = state
                .idempotency
                .mark_completed(key, reply.status.as_u16(), reply.body.clone())
                .await
            {
                tracing::error!(idempotency_key = %key, error = %e, "Failed to store response");
            }
            Ok(reply)
        }
        Err(err) => {
            if let Err(e) = state.idempotency.mark_failed(key).await {
                tracing::error!(idempotency_key = %key, error = %e, "Failed to release key");
            }
            Err(err)
        }
    }
}

// =========================================================================
// Accounts
// =========================================================================

async fn open_account(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<ApiReply, AppError> {
    api_key.require(ACCOUNTS_WRITE)?;
    let command = parse_optional_body::<OpenAccountRequest>(&body)?.into_command()?;

    idempotent(&state, &context, uri.path(), &body, async {
        let account = state.accounts.open(command, &context).await?;
        Ok(ApiReply::created(success(
            &context,
            "Account opened",
            AccountResponse::from(&account),
        )))
    })
    .await
}

async fn get_account(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(account_number): Path<String>,
) -> Result<ApiReply, AppError> {
    api_key.require(ACCOUNTS_READ)?;
    let number = AccountNumber::parse(&account_number)?;

    let view = match state.cache.get(number.as_str()).await {
        Some(view) => view,
        None => {
            let view = state
                .projection
                .get_account(number.as_str())
                .await?
                .ok_or_else(|| DomainError::AccountNotFound(number.to_string()))?;
            state.cache.put(view.clone()).await;
            view
        }
    };

    Ok(ApiReply::ok(success(
        &context,
        "Account retrieved",
        AccountResponse::from(view),
    )))
}

/// Always read from the database, never from the cache
async fn get_balance(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(account_number): Path<String>,
) -> Result<ApiReply, AppError> {
    api_key.require(ACCOUNTS_READ)?;
    let number = AccountNumber::parse(&account_number)?;

    let view = state
        .projection
        .get_account(number.as_str())
        .await?
        .ok_or_else(|| DomainError::AccountNotFound(number.to_string()))?;

    Ok(ApiReply::ok(success(
        &context,
        "Balance retrieved",
        BalanceResponse::new(view, &state.limits, Utc::now()),
    )))
}

async fn change_status(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(account_number): Path<String>,
    status: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<ApiReply, AppError> {
    api_key.require(ACCOUNTS_WRITE)?;
    let command = ChangeStatusCommand {
        account_number: AccountNumber::parse(&account_number)?,
        status: query(status)?.status()?,
    };

    let account = state.accounts.change_status(command, &context).await?;

    Ok(ApiReply::ok(success(
        &context,
        "Account status updated",
        AccountResponse::from(&account),
    )))
}

async fn deposit(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(account_number): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<ApiReply, AppError> {
    api_key.require(ACCOUNTS_WRITE)?;
    let command = parse_body::<DepositRequest>(&body)?.into_command(&account_number)?;

    idempotent(&state, &context, uri.path(), &body, async {
        let receipt = state.accounts.deposit(command, &context).await?;
        Ok(ApiReply::ok(success(&context, "Deposit completed", receipt)))
    })
    .await
}

async fn withdraw(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(account_number): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<ApiReply, AppError> {
    api_key.require(ACCOUNTS_WRITE)?;
    let command = parse_body::<WithdrawRequest>(&body)?.into_command(&account_number)?;

    idempotent(&state, &context, uri.path(), &body, async {
        let receipt = state.accounts.withdraw(command, &context).await?;
        Ok(ApiReply::ok(success(&context, "Withdrawal completed", receipt)))
    })
    .await
}

async fn get_transaction(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<String>,
) -> Result<ApiReply, AppError> {
    api_key.require(ACCOUNTS_READ)?;

    let transaction = state
        .projection
        .get_transaction(&transaction_id)
        .await?
        .ok_or_else(|| DomainError::TransactionNotFound(transaction_id.clone()))?;

    Ok(ApiReply::ok(success(
        &context,
        "Transaction retrieved",
        TransactionResponse::from(transaction),
    )))
}

async fn list_transactions(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(account_number): Path<String>,
    page: Result<Query<PageQuery>, QueryRejection>,
) -> Result<ApiReply, AppError> {
    api_key.require(ACCOUNTS_READ)?;
    let number = AccountNumber::parse(&account_number)?;
    let (limit, offset) = query(page)?.bounds()?;

    if !state.projection.account_number_exists(number.as_str()).await? {
        return Err(DomainError::AccountNotFound(number.to_string()).into());
    }

    let transactions = state
        .projection
        .list_transactions(number.as_str(), limit, offset)
        .await?
        .into_iter()
        .map(TransactionResponse::from)
        .collect();

    Ok(ApiReply::ok(success(
        &context,
        "Transactions retrieved",
        TransactionPage {
            account_number: number.to_string(),
            limit,
            offset,
            transactions,
        },
    )))
}

// =========================================================================
// Transfers
// =========================================================================

async fn transfer(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<ApiReply, AppError> {
    api_key.require(TRANSFERS_WRITE)?;
    let command = parse_body::<TransferRequest>(&body)?.into_command()?;

    idempotent(&state, &context, uri.path(), &body, async {
        let result = state.transfers.execute(command, &context).await?;
        Ok(ApiReply::ok(success(&context, "Transfer completed", result)))
    })
    .await
}

async fn get_transfer(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(transfer_id): Path<String>,
) -> Result<ApiReply, AppError> {
    api_key.require(TRANSFERS_READ)?;
    let id = parse_id("transferId", &transfer_id)?;

    let transfer = state
        .projection
        .get_transfer(id)
        .await?
        .ok_or_else(|| DomainError::TransferNotFound(id.to_string()))?;

    Ok(ApiReply::ok(success(
        &context,
        "Transfer retrieved",
        TransferResponse::from(transfer),
    )))
}

// =========================================================================
// Payments
// =========================================================================

async fn authorize_payment(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<ApiReply, AppError> {
    api_key.require(PAYMENTS_WRITE)?;
    let command = parse_body::<AuthorizePaymentRequest>(&body)?.into_command()?;

    idempotent(&state, &context, uri.path(), &body, async {
        let payment = state.payments.authorize(command, &context).await?;
        Ok(ApiReply::created(success(
            &context,
            "Payment authorized",
            PaymentResponse::from(&payment),
        )))
    })
    .await
}

async fn get_payment(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(payment_id): Path<String>,
) -> Result<ApiReply, AppError> {
    api_key.require(PAYMENTS_READ)?;
    let id = parse_id("paymentId", &payment_id)?;

    let payment = state
        .projection
        .get_payment(id)
        .await?
        .ok_or_else(|| DomainError::PaymentNotFound(id.to_string()))?;

    Ok(ApiReply::ok(success(
        &context,
        "Payment retrieved",
        PaymentResponse::from(payment),
    )))
}

async fn capture_payment(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(payment_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<ApiReply, AppError> {
    api_key.require(PAYMENTS_WRITE)?;
    let id = parse_id("paymentId", &payment_id)?;

    idempotent(&state, &context, uri.path(), &body, async {
        let payment = state.payments.capture(id, &context).await?;
        Ok(ApiReply::ok(success(
            &context,
            "Payment captured",
            PaymentResponse::from(&payment),
        )))
    })
    .await
}

async fn cancel_payment(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(payment_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<ApiReply, AppError> {
    api_key.require(PAYMENTS_WRITE)?;
    let id = parse_id("paymentId", &payment_id)?;

    idempotent(&state, &context, uri.path(), &body, async {
        let payment = state.payments.cancel(id, &context).await?;
        Ok(ApiReply::ok(success(
            &context,
            "Payment cancelled",
            PaymentResponse::from(&payment),
        )))
    })
    .await
}

async fn refund_payment(
    State(state): State<AppState>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Extension(context): Extension<OperationContext>,
    Path(payment_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<ApiReply, AppError> {
    api_key.require(PAYMENTS_WRITE)?;
    let id = parse_id("paymentId", &payment_id)?;
    let command = parse_optional_body::<RefundRequest>(&body)?.into_command(id)?;

    idempotent(&state, &context, uri.path(), &body, async {
        let payment = state.payments.refund(command, &context).await?;
        Ok(ApiReply::ok(success(
            &context,
            "Payment refunded",
            PaymentResponse::from(&payment),
        )))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dto::TransferRequest;

    #[test]
    fn test_parse_body_rejects_empty_and_malformed() {
        assert!(matches!(
            parse_body::<TransferRequest>(b"  "),
            Err(AppError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_body::<TransferRequest>(b"{\"amount\": "),
            Err(AppError::InvalidJson(_))
        ));
        assert!(parse_body::<TransferRequest>(b"{}").is_ok());
    }

    #[test]
    fn test_parse_optional_body_defaults_when_empty() {
        let request: RefundRequest = parse_optional_body(b"").unwrap();
        assert!(request.amount.is_none());
    }

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id("paymentId", &id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_id("paymentId", "nope"),
            Err(AppError::Validation(_))
        ));
    }
}
