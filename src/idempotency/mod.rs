//! Idempotency module
//!
//! Prevents duplicate request processing using idempotency keys.

mod repository;

pub use repository::{
    Claim, IdempotencyError, IdempotencyKey, IdempotencyRepository, IdempotencyStatus,
    MAX_KEY_LENGTH,
};
