//! Idempotency Repository
//!
//! Manages idempotency keys for preventing duplicate request processing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

/// Longest accepted Idempotency-Key header value
pub const MAX_KEY_LENGTH: usize = 100;

/// A key stuck in `processing` longer than this may be taken over
const STALE_AFTER_MINUTES: i64 = 5;

/// Idempotency key status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

impl From<String> for IdempotencyStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => IdempotencyStatus::Completed,
            "failed" => IdempotencyStatus::Failed,
            _ => IdempotencyStatus::Processing,
        }
    }
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdempotencyStatus::Processing => write!(f, "processing"),
            IdempotencyStatus::Completed => write!(f, "completed"),
            IdempotencyStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Stored idempotency key information
#[derive(Debug, Clone)]
pub struct IdempotencyKey {
    pub key: String,
    pub request_hash: String,
    pub response_status: Option<i16>,
    pub response_body: Option<serde_json::Value>,
    pub status: IdempotencyStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyKey {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.processing_started_at {
            Some(started) => now - started >= Duration::minutes(STALE_AFTER_MINUTES),
            None => true,
        }
    }
}

/// Result of claiming a key
#[derive(Debug, Clone)]
pub enum Claim {
    /// Caller owns the key and must finish with `mark_completed` or `mark_failed`
    Acquired,

    /// The request already completed; replay this response
    Completed { status: u16, body: serde_json::Value },
}

/// Idempotency Repository Error
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Key already exists and is being processed")]
    KeyInProgress,

    #[error("Request hash mismatch for key {0}")]
    HashMismatch(String),

    #[error("Invalid idempotency key: {0}")]
    InvalidKey(String),

    #[error("Key not found: {0}")]
    NotFound(String),
}

/// Repository for managing idempotency keys
#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    pool: PgPool,
}

type KeyRow = (
    String,
    String,
    Option<i16>,
    Option<serde_json::Value>,
    String,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

impl IdempotencyRepository {
    /// Create a new IdempotencyRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validate a client supplied key
    pub fn validate_key(key: &str) -> Result<(), IdempotencyError> {
        if key.trim().is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(IdempotencyError::InvalidKey(format!(
                "must be 1-{} characters",
                MAX_KEY_LENGTH
            )));
        }
        if !key.chars().all(|c| c.is_ascii_graphic()) {
            return Err(IdempotencyError::InvalidKey(
                "must contain printable ASCII only".to_string(),
            ));
        }
        Ok(())
    }

    /// Get an existing idempotency key
    pub async fn get(&self, key: &str) -> Result<Option<IdempotencyKey>, IdempotencyError> {
        let result: Option<KeyRow> = sqlx::query_as(
            r#"
            SELECT
                key, request_hash, response_status, response_body,
                processing_status, processing_started_at, created_at, expires_at
            FROM idempotency_keys
            WHERE key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result.map(
            |(key, request_hash, response_status, response_body, status, processing_started_at, created_at, expires_at)| {
                IdempotencyKey {
                    key,
                    request_hash,
                    response_status,
                    response_body,
                    status: IdempotencyStatus::from(status),
                    processing_started_at,
                    created_at,
                    expires_at,
                }
            },
        ))
    }

    // =========================================================================
    // start_processing
    // =========================================================================

    /// Claim a key for processing.
    ///
    /// - new key: inserted as `processing`, returns `Acquired`
    /// - same key with another request hash: `HashMismatch`
    /// - completed: returns the cached response
    /// - processing for less than 5 minutes: `KeyInProgress`
    /// - failed or stale: taken over, returns `Acquired`
    pub async fn start_processing(
        &self,
        key: &str,
        request_hash: &str,
    ) -> Result<Claim, IdempotencyError> {
        // Expired leftovers must not block a fresh claim
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND expires_at <= NOW()")
            .bind(key)
            .execute(&self.pool)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, request_hash, processing_status, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(Claim::Acquired);
        }

        let existing = self
            .get(key)
            .await?
            .ok_or_else(|| IdempotencyError::NotFound(key.to_string()))?;

        if existing.request_hash != request_hash {
            return Err(IdempotencyError::HashMismatch(key.to_string()));
        }

        match existing.status {
            IdempotencyStatus::Completed => Ok(Claim::Completed {
                status: existing
                    .response_status
                    .and_then(|s| u16::try_from(s).ok())
                    .unwrap_or(200),
                body: existing.response_body.unwrap_or(serde_json::Value::Null),
            }),
            IdempotencyStatus::Processing if !existing.is_stale(Utc::now()) => {
                Err(IdempotencyError::KeyInProgress)
            }
            _ => {
                // Failed or stuck: take over only if nobody else did first
                let taken = sqlx::query(
                    r#"
                    UPDATE idempotency_keys
                    SET processing_status = 'processing', processing_started_at = NOW()
                    WHERE key = $1 AND processing_status = $2
                      AND processing_started_at IS NOT DISTINCT FROM $3
                    "#,
                )
                .bind(key)
                .bind(existing.status.to_string())
                .bind(existing.processing_started_at)
                .execute(&self.pool)
                .await?
                .rows_affected();

                if taken == 1 {
                    Ok(Claim::Acquired)
                } else {
                    Err(IdempotencyError::KeyInProgress)
                }
            }
        }
    }

    // =========================================================================
    // mark_completed / mark_failed
    // =========================================================================

    /// Mark an idempotency key as completed with response
    pub async fn mark_completed(
        &self,
        key: &str,
        response_status: u16,
        response_body: serde_json::Value,
    ) -> Result<(), IdempotencyError> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET
                processing_status = 'completed',
                response_status = $2,
                response_body = $3
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(response_status as i16)
        .bind(response_body)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IdempotencyError::NotFound(key.to_string()));
        }

        Ok(())
    }

    /// Mark an idempotency key as failed so the client may retry
    pub async fn mark_failed(&self, key: &str) -> Result<(), IdempotencyError> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'failed'
            WHERE key = $1
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IdempotencyError::NotFound(key.to_string()));
        }

        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Move keys stuck in `processing` to `failed`
    pub async fn reset_stale(&self) -> Result<u64, IdempotencyError> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'failed'
            WHERE processing_status = 'processing'
              AND processing_started_at < NOW() - make_interval(mins => $1)
            "#,
        )
        .bind(STALE_AFTER_MINUTES as i32)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    /// Delete expired idempotency keys
    pub async fn cleanup_expired(&self) -> Result<u64, IdempotencyError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM idempotency_keys
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    /// SHA-256 over method, path and body, used to detect key reuse with a
    /// different request
    pub fn compute_request_hash(method: &str, path: &str, body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(body);
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_status_from_string() {
        assert_eq!(
            IdempotencyStatus::from("processing".to_string()),
            IdempotencyStatus::Processing
        );
        assert_eq!(
            IdempotencyStatus::from("completed".to_string()),
            IdempotencyStatus::Completed
        );
        assert_eq!(
            IdempotencyStatus::from("failed".to_string()),
            IdempotencyStatus::Failed
        );
    }

    #[test]
    fn test_idempotency_status_display() {
        assert_eq!(IdempotencyStatus::Processing.to_string(), "processing");
        assert_eq!(IdempotencyStatus::Completed.to_string(), "completed");
        assert_eq!(IdempotencyStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_compute_request_hash() {
        let body = b"{\"amount\": \"100.00\"}";
        let hash = IdempotencyRepository::compute_request_hash("POST", "/api/v1/transfers", body);

        // Hash should be 64 hex characters (SHA-256)
        assert_eq!(hash.len(), 64);

        // Same input should produce same hash
        let hash2 = IdempotencyRepository::compute_request_hash("POST", "/api/v1/transfers", body);
        assert_eq!(hash, hash2);

        // Different body or path should produce different hash
        let other_body = IdempotencyRepository::compute_request_hash(
            "POST",
            "/api/v1/transfers",
            b"{\"amount\": \"200.00\"}",
        );
        assert_ne!(hash, other_body);

        let other_path = IdempotencyRepository::compute_request_hash("POST", "/api/v1/payments", body);
        assert_ne!(hash, other_path);
    }

    #[test]
    fn test_validate_key() {
        assert!(IdempotencyRepository::validate_key("order-123").is_ok());
        assert!(IdempotencyRepository::validate_key("").is_err());
        assert!(IdempotencyRepository::validate_key("has space").is_err());
        assert!(IdempotencyRepository::validate_key(&"k".repeat(101)).is_err());
        assert!(IdempotencyRepository::validate_key(&"k".repeat(100)).is_ok());
    }

    #[test]
    fn test_stale_detection() {
        let now = Utc::now();
        let mut key = IdempotencyKey {
            key: "k".to_string(),
            request_hash: String::new(),
            response_status: None,
            response_body: None,
            status: IdempotencyStatus::Processing,
            processing_started_at: Some(now - Duration::minutes(1)),
            created_at: now,
            expires_at: now + Duration::hours(24),
        };
        assert!(!key.is_stale(now));

        key.processing_started_at = Some(now - Duration::minutes(6));
        assert!(key.is_stale(now));
    }

    #[test]
    fn test_idempotency_error_display() {
        let err = IdempotencyError::KeyInProgress;
        assert!(err.to_string().contains("being processed"));

        let err = IdempotencyError::HashMismatch("abc".to_string());
        assert!(err.to_string().contains("hash mismatch"));
    }
}
