//! Post-commit balance cache propagation
//!
//! Runs after the store has committed. Failures never unwind the commit;
//! the account is queued for reconciliation instead.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{BalanceCache, CacheError, ReconcileQueue};
use crate::domain::Account;
use crate::store::with_timeout;

#[derive(Clone)]
pub struct BalanceSync {
    cache: Arc<dyn BalanceCache>,
    reconcile: Arc<ReconcileQueue>,
    timeout: Duration,
}

impl BalanceSync {
    pub fn new(
        cache: Arc<dyn BalanceCache>,
        reconcile: Arc<ReconcileQueue>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            reconcile,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<dyn BalanceCache> {
        &self.cache
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply a committed `delta` to the cached balance of `account`.
    ///
    /// `account` is the row as written by the commit. On a cache miss the
    /// committed balance is written and the account is queued, since a
    /// concurrent commit may land its own value in between. A cached result
    /// that disagrees with the committed balance is queued as well: either a
    /// concurrent delta is still in flight or the entry has drifted.
    pub async fn apply_delta(&self, account: &Account, delta: i64) {
        let result = match with_timeout(self.timeout, self.cache.adjust_balance(account.id, delta))
            .await
        {
            Ok(Some(cached)) => {
                if cached != account.balance_in_cents {
                    tracing::debug!(
                        account_id = account.id,
                        cached,
                        committed = account.balance_in_cents,
                        "Cached balance disagrees with commit, queued for reconciliation"
                    );
                    self.reconcile.mark(account.id);
                }
                Ok(())
            }
            Ok(None) => {
                self.reconcile.mark(account.id);
                with_timeout(
                    self.timeout,
                    self.cache.set_balance(account.id, account.balance_in_cents),
                )
                .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.report(account, e);
        }
    }

    /// Overwrite the cached balance with the committed one.
    pub async fn overwrite(&self, account: &Account) {
        if let Err(e) = with_timeout(
            self.timeout,
            self.cache.set_balance(account.id, account.balance_in_cents),
        )
        .await
        {
            self.report(account, e);
        }
    }

    /// Fill a cache miss from a store read. The read may already be stale by
    /// the time it lands, so the account is queued too.
    pub async fn repopulate(&self, account: &Account) {
        self.reconcile.mark(account.id);
        self.overwrite(account).await;
    }

    fn report(&self, account: &Account, error: CacheError) {
        tracing::error!(
            account_id = account.id,
            error = %error,
            "Balance cache update failed, queued for reconciliation"
        );
        self.reconcile.mark(account.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::domain::Metadata;

    fn account(id: i64, balance: i64) -> Account {
        Account {
            id,
            controlling_bank: "alpha".into(),
            metadata: Metadata::parse("{}").unwrap(),
            balance_in_cents: balance,
            frozen: false,
            version: 2,
        }
    }

    fn sync(cache: Arc<MemoryCache>) -> (BalanceSync, Arc<ReconcileQueue>) {
        let queue = Arc::new(ReconcileQueue::new());
        (
            BalanceSync::new(cache, queue.clone(), Duration::from_secs(1)),
            queue,
        )
    }

    #[tokio::test]
    async fn test_delta_applied_to_existing_entry() {
        let cache = Arc::new(MemoryCache::new());
        cache.set_balance(1, 100).await.unwrap();
        let (sync, queue) = sync(cache.clone());

        sync.apply_delta(&account(1, 70), -30).await;
        assert_eq!(cache.get_balance(1).await.unwrap(), Some(70));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_miss_writes_committed_value_and_queues() {
        let cache = Arc::new(MemoryCache::new());
        let (sync, queue) = sync(cache.clone());

        sync.apply_delta(&account(1, 70), -30).await;
        assert_eq!(cache.get_balance(1).await.unwrap(), Some(70));
        assert_eq!(queue.drain(), vec![1]);
    }

    #[tokio::test]
    async fn test_disagreeing_delta_result_is_queued() {
        let cache = Arc::new(MemoryCache::new());
        cache.set_balance(1, 90).await.unwrap();
        let (sync, queue) = sync(cache.clone());

        // The entry already reflects this commit, so the delta lands twice.
        sync.apply_delta(&account(1, 90), -10).await;
        assert_eq!(cache.get_balance(1).await.unwrap(), Some(80));
        assert_eq!(queue.drain(), vec![1]);
    }

    #[tokio::test]
    async fn test_repopulate_queues_account() {
        let cache = Arc::new(MemoryCache::new());
        let (sync, queue) = sync(cache.clone());

        sync.repopulate(&account(3, 25)).await;
        assert_eq!(cache.get_balance(3).await.unwrap(), Some(25));
        assert_eq!(queue.drain(), vec![3]);
    }

    #[tokio::test]
    async fn test_failure_is_queued() {
        let cache = Arc::new(MemoryCache::new());
        cache.set_offline(true);
        let (sync, queue) = sync(cache);

        sync.overwrite(&account(4, 10)).await;
        sync.apply_delta(&account(5, 10), 10).await;
        assert_eq!(queue.drain(), vec![4, 5]);
    }
}
