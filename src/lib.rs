//! Fintech platform library
//!
//! Account ledger, transfers and payments on an event-sourced core.
//! Re-exports modules for the binary and for integration testing.

pub mod aggregate;
pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod event_store;
pub mod gateway;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod projection;
pub mod stream;

mod error;

pub use api::AppState;
pub use config::Config;
pub use domain::{AccountEvent, DomainError, Money, OperationContext, PaymentEvent, TransferEvent};
pub use error::{AppError, AppResult};

use axum::{extract::State, http::StatusCode, middleware, routing::get, Json, Router};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use api::middleware::{auth_middleware, logging_middleware, request_id_middleware};
use api::response::ApiResponse;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Layers run outermost first: request id -> logging -> auth -> handler
    let protected_routes = api::create_router()
        .layer(middleware::from_fn_with_state(
            state.pool.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn(logging_middleware));

    Router::new()
        // Health checks (no auth)
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .nest("/api/v1", protected_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness
async fn health_check() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success("OK", serde_json::json!({ "status": "UP" })))
}

/// Readiness: the database answers
async fn readiness_check(State(pool): State<PgPool>) -> (StatusCode, Json<serde_json::Value>) {
    match db::verify_connection(&pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success("Ready", serde_json::json!({ "database": "UP" })).to_value()),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::to_value(ApiResponse::error("SERVICE_UNAVAILABLE", "Database unavailable"))
                    .unwrap_or_default()),
            )
        }
    }
}
