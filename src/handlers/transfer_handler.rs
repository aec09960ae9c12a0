//! Transfer Engine
//!
//! The only path by which money moves between two accounts.
//!
//! Each attempt reads both accounts from the durable store, checks
//! authorization, frozen status and funds against that snapshot, and asks the
//! store to commit a posting guarded by the snapshot's versions. A version
//! mismatch means another mutation landed in between; the attempt is discarded
//! and the next one starts again from a fresh read. The cache is never
//! consulted to admit a debit.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineSettings;
use crate::domain::{
    Account, AccountId, CommittedTransfer, LedgerError, OperationContext, Principal, Transfer,
    TransferPosting, TransferRequest,
};
use crate::store::{with_timeout, LedgerStore};

use super::{BalanceSync, TransferCommand};

const RETRY_BACKOFF_MS: u64 = 5;

// =========================================================================
// TransferEngine
// =========================================================================

#[derive(Clone)]
pub struct TransferEngine {
    store: Arc<dyn LedgerStore>,
    balances: BalanceSync,
    settings: EngineSettings,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn LedgerStore>, balances: BalanceSync, settings: EngineSettings) -> Self {
        Self {
            store,
            balances,
            settings,
        }
    }

    /// Execute the transfer command
    pub async fn execute(
        &self,
        principal: &Principal,
        command: TransferCommand,
        context: &OperationContext,
    ) -> Result<Transfer, LedgerError> {
        let request = TransferRequest::new(
            command.source_account_id,
            command.target_account_id,
            command.amount_in_cents,
        )?;

        let max_attempts = self.settings.transfer_max_attempts.max(1);
        let mut attempt = 1;

        let committed = loop {
            match self.try_commit(principal, &request).await {
                Ok(committed) => break committed,
                Err(LedgerError::EditConflict) if attempt < max_attempts => {
                    tracing::warn!(
                        source_account_id = request.source_account_id,
                        target_account_id = request.target_account_id,
                        attempt,
                        max_attempts,
                        correlation_id = ?context.correlation_id,
                        "Transfer edit conflict, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                        .await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        tracing::debug!(
            transfer_id = committed.transfer.id,
            source_account_id = committed.source.id,
            target_account_id = committed.target.id,
            amount_in_cents = committed.transfer.amount_in_cents,
            attempt,
            bank = %principal.username,
            "Transfer committed"
        );

        let amount = committed.transfer.amount_in_cents;
        self.balances.apply_delta(&committed.source, -amount).await;
        self.balances.apply_delta(&committed.target, amount).await;

        Ok(committed.transfer)
    }

    /// One read-check-commit pass.
    async fn try_commit(
        &self,
        principal: &Principal,
        request: &TransferRequest,
    ) -> Result<CommittedTransfer, LedgerError> {
        let source = self.load(request.source_account_id).await?;
        if !source.is_managed_by(principal) {
            return Err(LedgerError::NotPermitted);
        }
        let target = self.load(request.target_account_id).await?;

        source.ensure_can_debit(&request.amount)?;
        target.ensure_can_credit(&request.amount)?;

        let posting = TransferPosting::from_snapshots(&source, &target, request.amount);

        // A timeout here is final: the commit may have landed, so the
        // same posting must not be sent again.
        Ok(with_timeout(self.settings.store_timeout, self.store.commit_transfer(&posting)).await?)
    }

    async fn load(&self, id: AccountId) -> Result<Account, LedgerError> {
        Ok(with_timeout(self.settings.store_timeout, self.store.get_account(id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BalanceCache, MemoryCache, ReconcileQueue};
    use crate::domain::NewAccount;
    use crate::store::MemoryLedgerStore;

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        cache: Arc<MemoryCache>,
        queue: Arc<ReconcileQueue>,
        engine: TransferEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let cache = Arc::new(MemoryCache::new());
        let queue = Arc::new(ReconcileQueue::new());
        let settings = EngineSettings::default();
        let balances = BalanceSync::new(cache.clone(), queue.clone(), settings.store_timeout);
        let engine = TransferEngine::new(store.clone(), balances, settings);
        Fixture {
            store,
            cache,
            queue,
            engine,
        }
    }

    async fn open(f: &Fixture, bank: &str, cents: i64) -> Account {
        let account = f
            .store
            .insert_account(&NewAccount::new(bank, "{}").unwrap())
            .await
            .unwrap();
        let account = if cents != 0 {
            f.store.adjust_supply(account.id, cents, false).await.unwrap()
        } else {
            account
        };
        f.cache
            .set_balance(account.id, account.balance_in_cents)
            .await
            .unwrap();
        account
    }

    fn bank(name: &str) -> Principal {
        Principal {
            username: name.into(),
            admin: false,
        }
    }

    fn admin() -> Principal {
        Principal {
            username: "central".into(),
            admin: true,
        }
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_and_cache() {
        let f = fixture();
        let a = open(&f, "alpha", 100_000).await;
        let b = open(&f, "beta", 0).await;

        let transfer = f
            .engine
            .execute(&admin(), TransferCommand::new(a.id, b.id, 30_000), &OperationContext::new())
            .await
            .unwrap();
        assert_eq!(transfer.amount_in_cents, 30_000);

        assert_eq!(f.store.get_account(a.id).await.unwrap().balance_in_cents, 70_000);
        assert_eq!(f.store.get_account(b.id).await.unwrap().balance_in_cents, 30_000);
        assert_eq!(f.cache.get_balance(a.id).await.unwrap(), Some(70_000));
        assert_eq!(f.cache.get_balance(b.id).await.unwrap(), Some(30_000));
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_validation_precedes_lookup() {
        let f = fixture();
        let err = f
            .engine
            .execute(&admin(), TransferCommand::new(9, 9, 1), &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_non_controller_not_permitted() {
        let f = fixture();
        let a = open(&f, "alpha", 100).await;
        let b = open(&f, "beta", 0).await;

        let err = f
            .engine
            .execute(&bank("beta"), TransferCommand::new(a.id, b.id, 1), &OperationContext::new())
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::NotPermitted);

        // The controller may
        f.engine
            .execute(&bank("alpha"), TransferCommand::new(a.id, b.id, 1), &OperationContext::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cache_outage_does_not_unwind_commit() {
        let f = fixture();
        let a = open(&f, "alpha", 100).await;
        let b = open(&f, "beta", 0).await;
        f.cache.set_offline(true);

        f.engine
            .execute(&admin(), TransferCommand::new(a.id, b.id, 40), &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(f.store.get_account(a.id).await.unwrap().balance_in_cents, 60);
        assert_eq!(f.queue.drain(), vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_store_outage_is_unavailable() {
        let f = fixture();
        let a = open(&f, "alpha", 100).await;
        let b = open(&f, "beta", 0).await;
        f.store.set_offline(true);

        let err = f
            .engine
            .execute(&admin(), TransferCommand::new(a.id, b.id, 1), &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
    }
}
