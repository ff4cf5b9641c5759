//! Projection module
//!
//! Updates read-model tables (projections) from events.
//! Projections are optimized for queries and derived from events.

mod service;
mod views;

pub use service::{ProjectionError, ProjectionService};
pub use views::{AccountView, PaymentView, TransactionView, TransferView};
