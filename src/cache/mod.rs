//! Balance cache and token store
//!
//! The cache is a read optimization for balances and never gates a money
//! movement. It is written only after the durable store commits. Entries that
//! could not be brought in step are queued in a [`ReconcileQueue`] and
//! overwritten from the store by the reconciliation job.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;

use crate::domain::{AccountId, LedgerError};

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// Errors that can occur in the cache or token store
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Cache operation timed out")]
    Timeout,

    /// A stored value could not be decoded
    #[error("Corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CacheError::Timeout
    }
}

impl From<CacheError> for LedgerError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Timeout => LedgerError::Timeout,
            other => LedgerError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait BalanceCache: Send + Sync {
    /// Unconditional overwrite.
    async fn set_balance(&self, id: AccountId, balance_in_cents: i64) -> Result<(), CacheError>;

    /// `None` on a miss.
    async fn get_balance(&self, id: AccountId) -> Result<Option<i64>, CacheError>;

    /// Atomic increment of an existing entry. Returns the new value, or `None`
    /// if the key is absent; a missing entry is never created here.
    async fn adjust_balance(&self, id: AccountId, delta: i64) -> Result<Option<i64>, CacheError>;
}

/// An issued authentication token, keyed by the SHA-256 hex of its plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub hash: String,
    pub username: String,
    pub admin: bool,
    pub expiry: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), CacheError>;

    /// Unknown and expired tokens are both `None`.
    async fn get_token(&self, hash: &str) -> Result<Option<TokenRecord>, CacheError>;
}

/// Accounts whose cached balance is known to be out of step with the store.
#[derive(Debug, Default)]
pub struct ReconcileQueue {
    pending: Mutex<BTreeSet<AccountId>>,
}

impl ReconcileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, id: AccountId) {
        self.pending.lock().insert(id);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Take every pending id, leaving the queue empty.
    pub fn drain(&self) -> Vec<AccountId> {
        std::mem::take(&mut *self.pending.lock()).into_iter().collect()
    }
}
