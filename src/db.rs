//! Database module
//!
//! Connection checks and small helpers for PostgreSQL error codes.
//! The schema lives in `migrations/0001_init.sql` and is applied out of band.

use sqlx::PgPool;

/// Tables the service reads or writes
const REQUIRED_TABLES: &[&str] = &[
    "api_keys",
    "events",
    "event_snapshots",
    "accounts",
    "account_transactions",
    "transfers",
    "payments",
    "idempotency_keys",
    "stream_offsets",
];

const UNIQUE_VIOLATION: &str = "23505";

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(table = %table, "Required table does not exist");
            return Ok(false);
        }
    }

    Ok(true)
}

/// Name of the violated unique constraint, if `err` is a unique violation
pub fn unique_violation(err: &sqlx::Error) -> Option<String> {
    let db_err = err.as_database_error()?;
    if db_err.code().as_deref() != Some(UNIQUE_VIOLATION) {
        return None;
    }
    Some(db_err.constraint().unwrap_or_default().to_string())
}

/// Check whether `err` is a unique violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    unique_violation(err).is_some()
}
