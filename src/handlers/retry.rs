//! Optimistic concurrency retry
//!
//! A command loads its aggregates, decides, and appends with the versions it
//! saw. When another writer got there first the whole attempt is repeated
//! against fresh state.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

pub const MAX_ATTEMPTS: u32 = 3;

const BACKOFF_STEP_MS: u64 = 50;

/// Run `attempt` until it succeeds, fails with something other than a
/// concurrency conflict, or `MAX_ATTEMPTS` is reached.
pub async fn with_conflict_retry<T, F, Fut>(operation: &str, mut attempt: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(AppError::ConcurrentModification) if tries < MAX_ATTEMPTS => {
                tracing::warn!(operation, attempt = tries, "Concurrency conflict, retrying");
                tokio::time::sleep(Duration::from_millis(BACKOFF_STEP_MS * tries as u64)).await;
                tries += 1;
            }
            Err(AppError::ConcurrentModification) => {
                tracing::error!(operation, attempts = tries, "Concurrency conflict not resolved");
                return Err(AppError::ConcurrentModification);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_conflicts_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let result = with_conflict_retry("test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::ConcurrentModification)
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_conflict_retry("test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::ConcurrentModification)
        })
        .await;

        assert!(matches!(result, Err(AppError::ConcurrentModification)));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_conflict_retry("test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Domain(DomainError::SameAccountTransfer))
        })
        .await;

        assert!(matches!(result, Err(AppError::Domain(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
