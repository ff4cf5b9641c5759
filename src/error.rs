//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::response::{ApiResponse, FieldError};
use crate::domain::{AccountNumberError, DomainError, MoneyError};
use crate::event_store::EventStoreError;
use crate::gateway::GatewayError;
use crate::idempotency::IdempotencyError;
use crate::projection::ProjectionError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Malformed JSON body: {0}")]
    InvalidJson(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Request with this idempotency key is still being processed")]
    DuplicateRequest,

    #[error("Idempotency key was already used with a different request")]
    IdempotencyKeyReused,

    #[error("Concurrent modification detected, please retry")]
    ConcurrentModification,

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Upstream errors (5xx)
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Single-field validation failure
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn status(&self) -> StatusCode {
        self.status_and_code().0
    }

    pub fn code(&self) -> &'static str {
        self.status_and_code().1
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::InvalidJson(_) => (StatusCode::BAD_REQUEST, "INVALID_JSON"),
            AppError::MissingHeader(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::DuplicateRequest => (StatusCode::CONFLICT, "DUPLICATE_REQUEST"),
            AppError::IdempotencyKeyReused => {
                (StatusCode::UNPROCESSABLE_ENTITY, "IDEMPOTENCY_KEY_REUSED")
            }
            AppError::ConcurrentModification => (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION"),

            AppError::Domain(domain_err) => match domain_err {
                DomainError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                DomainError::InvalidAccountNumber(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_ACCOUNT_NUMBER")
                }
                DomainError::SameAccountTransfer => {
                    (StatusCode::BAD_REQUEST, "SAME_ACCOUNT_TRANSFER")
                }
                DomainError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
                DomainError::TransactionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "TRANSACTION_NOT_FOUND")
                }
                DomainError::TransferNotFound(_) => (StatusCode::NOT_FOUND, "TRANSFER_NOT_FOUND"),
                DomainError::PaymentNotFound(_) => (StatusCode::NOT_FOUND, "PAYMENT_NOT_FOUND"),
                DomainError::InsufficientBalance { .. } => {
                    (StatusCode::CONFLICT, "INSUFFICIENT_BALANCE")
                }
                DomainError::InactiveAccount { .. } => (StatusCode::CONFLICT, "INACTIVE_ACCOUNT"),
                DomainError::DuplicateTransaction { .. } => {
                    (StatusCode::CONFLICT, "DUPLICATE_TRANSACTION")
                }
                DomainError::DuplicateAccount(_) => (StatusCode::CONFLICT, "DUPLICATE_ACCOUNT"),
                DomainError::VersionConflict { .. } => {
                    (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION")
                }
                DomainError::DailyLimitExceeded { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "DAILY_LIMIT_EXCEEDED")
                }
                DomainError::InvalidState(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_STATE"),
                DomainError::PaymentDeclined { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "PAYMENT_DECLINED")
                }
            },

            AppError::Gateway(_) => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
            AppError::Database(_) | AppError::Internal(_) | AppError::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SYSTEM_ERROR")
            }
        }
    }

    /// Message shown to the client; server-side details stay in the logs
    fn public_message(&self) -> String {
        match self {
            AppError::Database(e) => {
                tracing::error!(error = ?e, "Database error");
                "An internal error occurred".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                "An internal error occurred".to_string()
            }
            AppError::Config(e) => {
                tracing::error!(error = ?e, "Config error");
                "An internal error occurred".to_string()
            }
            AppError::Gateway(msg) => {
                tracing::warn!(error = %msg, "Payment gateway error");
                "Payment gateway is unavailable".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.public_message();

        let errors = match self {
            AppError::Validation(errors) => errors,
            AppError::MissingHeader(header) => {
                vec![FieldError::new(header, "header is required")]
            }
            _ => Vec::new(),
        };

        let body = ApiResponse::error(code, message).with_errors(errors);

        (status, Json(body)).into_response()
    }
}

impl From<MoneyError> for AppError {
    fn from(err: MoneyError) -> Self {
        AppError::Domain(err.into())
    }
}

impl From<AccountNumberError> for AppError {
    fn from(err: AccountNumberError) -> Self {
        AppError::Domain(err.into())
    }
}

impl From<EventStoreError> for AppError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict { .. } => AppError::ConcurrentModification,
            EventStoreError::Database(e) => AppError::Database(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<ProjectionError> for AppError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::DuplicateAccount(number) => {
                AppError::Domain(DomainError::DuplicateAccount(number))
            }
            ProjectionError::DuplicateTransaction(transaction_id) => {
                AppError::Domain(DomainError::DuplicateTransaction { transaction_id })
            }
            ProjectionError::Database(e) => AppError::Database(e),
            ProjectionError::InvalidState(msg) => AppError::Internal(msg),
        }
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::KeyInProgress => AppError::DuplicateRequest,
            IdempotencyError::HashMismatch(_) => AppError::IdempotencyKeyReused,
            IdempotencyError::InvalidKey(msg) => AppError::field("Idempotency-Key", msg),
            IdempotencyError::Database(e) => AppError::Database(e),
            IdempotencyError::NotFound(key) => {
                AppError::Internal(format!("idempotency key vanished: {}", key))
            }
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Gateway(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountStatus;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[test]
    fn test_domain_error_mapping() {
        let cases = vec![
            (DomainError::InvalidAmount("x".into()), 400, "INVALID_AMOUNT"),
            (DomainError::InvalidAccountNumber("x".into()), 400, "INVALID_ACCOUNT_NUMBER"),
            (DomainError::SameAccountTransfer, 400, "SAME_ACCOUNT_TRANSFER"),
            (DomainError::AccountNotFound("x".into()), 404, "ACCOUNT_NOT_FOUND"),
            (DomainError::PaymentNotFound("x".into()), 404, "PAYMENT_NOT_FOUND"),
            (
                DomainError::insufficient_balance(Decimal::ONE, Decimal::ZERO),
                409,
                "INSUFFICIENT_BALANCE",
            ),
            (
                DomainError::InactiveAccount {
                    status: AccountStatus::Frozen,
                },
                409,
                "INACTIVE_ACCOUNT",
            ),
            (
                DomainError::DailyLimitExceeded {
                    limit: Decimal::ONE,
                    used: Decimal::ONE,
                    requested: Decimal::ONE,
                },
                422,
                "DAILY_LIMIT_EXCEEDED",
            ),
            (DomainError::invalid_state("x"), 422, "INVALID_STATE"),
            (
                DomainError::PaymentDeclined {
                    reason: "x".into(),
                },
                422,
                "PAYMENT_DECLINED",
            ),
        ];

        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status().as_u16(), status, "{}", code);
            assert_eq!(app.code(), code);
        }
    }

    #[test]
    fn test_infrastructure_error_mapping() {
        let conflict: AppError = EventStoreError::ConcurrencyConflict {
            aggregate_id: Uuid::new_v4(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(conflict.code(), "CONCURRENT_MODIFICATION");

        let reused: AppError = IdempotencyError::HashMismatch("k".into()).into();
        assert_eq!(reused.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(reused.code(), "IDEMPOTENCY_KEY_REUSED");

        let in_progress: AppError = IdempotencyError::KeyInProgress.into();
        assert_eq!(in_progress.code(), "DUPLICATE_REQUEST");

        let duplicate: AppError = ProjectionError::DuplicateTransaction("T1".into()).into();
        assert_eq!(duplicate.code(), "DUPLICATE_TRANSACTION");

        let gateway: AppError = GatewayError::Unavailable("down".into()).into();
        assert_eq!(gateway.status(), StatusCode::BAD_GATEWAY);

        let db: AppError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(db.code(), "SYSTEM_ERROR");
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::Internal("connection string leaked".into());
        assert_eq!(err.public_message(), "An internal error occurred");
    }
}
