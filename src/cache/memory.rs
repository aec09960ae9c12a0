//! In-process cache backend
//!
//! Used when no Redis URL is configured and by the test suites.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::AccountId;

use super::{BalanceCache, CacheError, TokenRecord, TokenStore};

#[derive(Debug, Default)]
pub struct MemoryCache {
    balances: DashMap<AccountId, i64>,
    tokens: DashMap<String, TokenRecord>,
    offline: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the cache server were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop a cached balance, simulating eviction.
    pub fn evict(&self, id: AccountId) {
        self.balances.remove(&id);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "cache offline",
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl BalanceCache for MemoryCache {
    async fn set_balance(&self, id: AccountId, balance_in_cents: i64) -> Result<(), CacheError> {
        self.check()?;
        self.balances.insert(id, balance_in_cents);
        Ok(())
    }

    async fn get_balance(&self, id: AccountId) -> Result<Option<i64>, CacheError> {
        self.check()?;
        Ok(self.balances.get(&id).map(|v| *v))
    }

    async fn adjust_balance(&self, id: AccountId, delta: i64) -> Result<Option<i64>, CacheError> {
        self.check()?;
        Ok(self.balances.get_mut(&id).map(|mut entry| {
            *entry = entry.saturating_add(delta);
            *entry
        }))
    }
}

#[async_trait]
impl TokenStore for MemoryCache {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), CacheError> {
        self.check()?;
        self.tokens.insert(record.hash.clone(), record.clone());
        Ok(())
    }

    async fn get_token(&self, hash: &str) -> Result<Option<TokenRecord>, CacheError> {
        self.check()?;
        let now = Utc::now();
        let expired = match self.tokens.get(hash) {
            None => return Ok(None),
            Some(record) if !record.is_expired(now) => return Ok(Some(record.clone())),
            Some(_) => true,
        };
        if expired {
            self.tokens.remove(hash);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_adjust_never_creates_missing_key() {
        let cache = MemoryCache::new();
        assert_eq!(cache.adjust_balance(1, 50).await.unwrap(), None);
        assert_eq!(cache.get_balance(1).await.unwrap(), None);

        cache.set_balance(1, 100).await.unwrap();
        assert_eq!(cache.adjust_balance(1, -30).await.unwrap(), Some(70));
        assert_eq!(cache.get_balance(1).await.unwrap(), Some(70));
    }

    #[tokio::test]
    async fn test_expired_token_is_absent() {
        let cache = MemoryCache::new();
        let record = TokenRecord {
            hash: "deadbeef".into(),
            username: "alpha".into(),
            admin: false,
            expiry: Utc::now() - Duration::seconds(1),
        };
        cache.insert_token(&record).await.unwrap();
        assert!(cache.get_token("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_cache_errors() {
        let cache = MemoryCache::new();
        cache.set_offline(true);
        assert!(matches!(
            cache.set_balance(1, 1).await,
            Err(CacheError::Redis(_))
        ));
    }
}
