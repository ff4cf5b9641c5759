//! Common test utilities
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rand::Rng;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::sync::Arc;
use tower::util::ServiceExt;

use fintech_platform::cache;
use fintech_platform::config::TransactionLimits;
use fintech_platform::gateway::SimulatedGateway;
use fintech_platform::{build_router, AppState};

pub const TEST_API_KEY: &str = "test_key_123";
pub const READ_ONLY_API_KEY: &str = "test_key_read_only";

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");
const MIGRATION_LOCK: i64 = 7_210_001;

/// Connect to `DATABASE_URL`, apply the schema and seed the test API keys.
///
/// Returns `None` when no database is configured so that callers can skip.
/// Tests share the database; they isolate themselves with fresh account
/// numbers instead of truncating tables.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping database test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // Several test binaries may start at once
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK)
        .execute(&mut *conn)
        .await
        .expect("Failed to take migration lock");
    (&mut *conn)
        .execute(MIGRATION)
        .await
        .expect("Failed to apply schema");
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK)
        .execute(&mut *conn)
        .await
        .expect("Failed to release migration lock");
    drop(conn);

    seed_api_key(&pool, "Test Key", TEST_API_KEY, &["admin"]).await;
    seed_api_key(
        &pool,
        "Read Only Key",
        READ_ONLY_API_KEY,
        &["accounts:read", "transfers:read", "payments:read"],
    )
    .await;

    Some(pool)
}

async fn seed_api_key(pool: &PgPool, name: &str, key: &str, permissions: &[&str]) {
    let permissions: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();
    sqlx::query(
        r#"
        INSERT INTO api_keys (name, key_prefix, key_hash, permissions, is_active)
        VALUES ($1, $2, encode(sha256($3::bytea), 'hex'), $4, true)
        ON CONFLICT (key_hash) DO UPDATE SET permissions = EXCLUDED.permissions, is_active = true
        "#,
    )
    .bind(name)
    .bind(&key[..key.len().min(12)])
    .bind(key.as_bytes())
    .bind(permissions)
    .execute(pool)
    .await
    .expect("Failed to seed API key");
}

pub fn test_limits() -> TransactionLimits {
    TransactionLimits {
        daily_withdrawal_limit: rust_decimal::Decimal::new(1000, 0),
        max_transaction_amount: rust_decimal::Decimal::new(50000, 0),
    }
}

/// Full application router backed by the simulated gateway
pub fn test_app(pool: PgPool) -> Router {
    let state = AppState::new(
        pool,
        cache::from_ttl_seconds(30),
        Arc::new(SimulatedGateway::new()),
        test_limits(),
    );
    build_router(state)
}

/// Router whose pool never connects, for requests rejected before any query
pub fn offline_app() -> Router {
    let pool = PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_millis(200))
        .connect_lazy("postgres://nobody@127.0.0.1:1/none")
        .expect("lazy pool");
    test_app(pool)
}

/// Random 13-digit account number
pub fn unique_account_number() -> String {
    let mut rng = rand::thread_rng();
    format!("9{:012}", rng.gen_range(0..1_000_000_000_000u64))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> TestResponse {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(json) => Body::from(json.to_string()),
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    TestResponse {
        status,
        headers,
        body,
    }
}

/// Request authenticated with the full-access test key
pub async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> TestResponse {
    send(app, method, uri, body, &[("X-API-Key", TEST_API_KEY)]).await
}

/// Open an ACTIVE account with the given opening balance
pub async fn open_account(app: &Router, initial_deposit: &str) -> String {
    let number = unique_account_number();
    let response = call(
        app,
        "POST",
        "/api/v1/accounts",
        Some(serde_json::json!({
            "account_number": number,
            "initial_deposit": initial_deposit,
        })),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "open failed: {}", response.body);
    number
}
