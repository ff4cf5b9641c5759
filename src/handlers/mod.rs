//! Command Handlers module
//!
//! Command handlers that orchestrate business operations.
//! Each handler loads aggregates, decides, and records the resulting events
//! together with the read model updates.

mod account_handler;
mod commands;
mod payment_handler;
mod recorder;
mod retry;
mod transfer_handler;

pub use account_handler::AccountHandler;
pub use commands::*;
pub use payment_handler::PaymentHandler;
pub use recorder::{DbTransaction, EventRecorder};
pub use retry::{with_conflict_retry, MAX_ATTEMPTS};
pub use transfer_handler::TransferHandler;
