//! Payment gateway port
//!
//! The payment handler talks to card networks/PSPs through
//! [`PaymentGateway`]. Calls are made outside database transactions.

mod http;
mod simulated;

pub use http::HttpGateway;
pub use simulated::SimulatedGateway;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub payment_id: Uuid,
    pub account_number: String,
    pub merchant_id: String,
    pub order_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum AuthorizationOutcome {
    Approved { reference: String },
    Declined { reason: String },
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, GatewayError>;

    /// Void an authorization. Voiding an already voided authorization
    /// succeeds.
    async fn cancel(&self, reference: &str) -> Result<(), GatewayError>;

    /// Refund against an authorization. Repeating a `refund_id` the gateway
    /// has already processed succeeds without refunding again.
    async fn refund(
        &self,
        reference: &str,
        refund_id: &str,
        amount: Decimal,
    ) -> Result<(), GatewayError>;
}

/// HTTP gateway when a URL is configured, the in-process simulator otherwise
pub fn from_config(url: Option<&str>, timeout: Duration) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
    match url {
        Some(url) => {
            tracing::info!(url = %url, "Using HTTP payment gateway");
            Ok(Arc::new(HttpGateway::new(url, timeout)?))
        }
        None => {
            tracing::info!("Using simulated payment gateway");
            Ok(Arc::new(SimulatedGateway::new()))
        }
    }
}
