//! Shared application state
//!
//! Built once at startup and cloned into every request.

use axum::extract::FromRef;
use sqlx::PgPool;
use std::sync::Arc;

use crate::cache::AccountCache;
use crate::config::TransactionLimits;
use crate::gateway::PaymentGateway;
use crate::handlers::{AccountHandler, PaymentHandler, TransferHandler};
use crate::idempotency::IdempotencyRepository;
use crate::projection::ProjectionService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub accounts: AccountHandler,
    pub transfers: TransferHandler,
    pub payments: PaymentHandler,
    pub projection: ProjectionService,
    pub idempotency: IdempotencyRepository,
    pub cache: Arc<dyn AccountCache>,
    pub limits: TransactionLimits,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        cache: Arc<dyn AccountCache>,
        gateway: Arc<dyn PaymentGateway>,
        limits: TransactionLimits,
    ) -> Self {
        Self {
            accounts: AccountHandler::new(pool.clone(), cache.clone(), limits),
            transfers: TransferHandler::new(pool.clone(), cache.clone(), limits),
            payments: PaymentHandler::new(pool.clone(), cache.clone(), gateway, limits),
            projection: ProjectionService::new(pool.clone()),
            idempotency: IdempotencyRepository::new(pool.clone()),
            pool,
            cache,
            limits,
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}
