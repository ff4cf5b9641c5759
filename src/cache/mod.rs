//! Account read cache
//!
//! Cache-aside store for account read models, keyed by account number.
//! Handlers read through it and invalidate entries after a commit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::projection::AccountView;

#[async_trait]
pub trait AccountCache: Send + Sync {
    async fn get(&self, account_number: &str) -> Option<AccountView>;
    async fn put(&self, account: AccountView);
    async fn invalidate(&self, account_number: &str);

    /// Drop expired entries. Returns how many were removed.
    async fn evict_expired(&self) -> usize {
        0
    }
}

/// In-process TTL cache
#[derive(Clone)]
pub struct InMemoryAccountCache {
    entries: Arc<RwLock<HashMap<String, (Instant, AccountView)>>>,
    ttl: Duration,
}

impl InMemoryAccountCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }
}

#[async_trait]
impl AccountCache for InMemoryAccountCache {
    async fn get(&self, account_number: &str) -> Option<AccountView> {
        let entries = self.entries.read().await;
        match entries.get(account_number) {
            Some((stored_at, view)) if stored_at.elapsed() < self.ttl => Some(view.clone()),
            _ => None,
        }
    }

    async fn put(&self, account: AccountView) {
        let mut entries = self.entries.write().await;
        entries.insert(account.account_number.clone(), (Instant::now(), account));
    }

    async fn invalidate(&self, account_number: &str) {
        let mut entries = self.entries.write().await;
        if entries.remove(account_number).is_some() {
            tracing::debug!(account_number = %account_number, "Account cache entry invalidated");
        }
    }

    async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        before - entries.len()
    }
}

/// Cache that stores nothing, for `CACHE_TTL_SECONDS=0`
#[derive(Debug, Clone, Default)]
pub struct NoopAccountCache;

#[async_trait]
impl AccountCache for NoopAccountCache {
    async fn get(&self, _account_number: &str) -> Option<AccountView> {
        None
    }

    async fn put(&self, _account: AccountView) {}

    async fn invalidate(&self, _account_number: &str) {}
}

/// Build the cache for a TTL in seconds; zero disables caching
pub fn from_ttl_seconds(ttl_seconds: u64) -> Arc<dyn AccountCache> {
    if ttl_seconds == 0 {
        Arc::new(NoopAccountCache)
    } else {
        Arc::new(InMemoryAccountCache::new(Duration::from_secs(ttl_seconds)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn view(number: &str) -> AccountView {
        AccountView {
            id: Uuid::new_v4(),
            account_number: number.to_string(),
            account_type: "CHECKING".to_string(),
            account_alias: None,
            balance: dec!(10.00),
            hold_amount: dec!(0.00),
            status: "ACTIVE".to_string(),
            daily_withdrawal_date: None,
            daily_withdrawal_used: dec!(0.00),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let cache = InMemoryAccountCache::new(Duration::from_secs(60));
        assert!(cache.get("1001234567890").await.is_none());

        cache.put(view("1001234567890")).await;
        let cached = cache.get("1001234567890").await.unwrap();
        assert_eq!(cached.balance, dec!(10.00));

        cache.invalidate("1001234567890").await;
        assert!(cache.get("1001234567890").await.is_none());
    }

    #[test]
    fn test_expired_entries_are_not_served() {
        tokio_test::block_on(async {
            let cache = InMemoryAccountCache::new(Duration::from_millis(0));
            cache.put(view("1001234567890")).await;
            assert!(cache.get("1001234567890").await.is_none());
            assert_eq!(cache.evict_expired().await, 1);
        });
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let cache = from_ttl_seconds(0);
        cache.put(view("1001234567890")).await;
        assert!(cache.get("1001234567890").await.is_none());
    }
}
