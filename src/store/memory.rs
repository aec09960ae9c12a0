//! In-memory ledger store
//!
//! A single mutex guards every table, so each call is trivially atomic. Used by
//! the test suites and the load harness; `with_latency` simulates a network hop
//! so concurrent callers genuinely interleave between read and commit.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::domain::{
    apply_supply_change, Account, AccountId, AmountError, Bank, CommittedTransfer, NewAccount,
    Transfer, TransferId, TransferPosting,
};

use super::{LedgerStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    transfers: BTreeMap<TransferId, Transfer>,
    banks: HashMap<String, Bank>,
    next_account_id: AccountId,
    next_transfer_id: TransferId,
}

#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    tables: Mutex<Tables>,
    latency: Option<Duration>,
    offline: AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it touches the tables.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Make every subsequent call fail as if the database were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of committed transfers.
    pub fn transfer_count(&self) -> usize {
        self.tables.lock().transfers.len()
    }

    async fn enter(&self) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

fn account_in<'a>(tables: &'a Tables, id: AccountId) -> Result<&'a Account, StoreError> {
    tables.accounts.get(&id).ok_or(StoreError::AccountNotFound(id))
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        self.enter().await?;
        let mut tables = self.tables.lock();
        tables.next_account_id += 1;
        let created = Account {
            id: tables.next_account_id,
            controlling_bank: account.controlling_bank.clone(),
            metadata: account.metadata.clone(),
            balance_in_cents: 0,
            frozen: false,
            version: 1,
        };
        tables.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.enter().await?;
        let tables = self.tables.lock();
        account_in(&tables, id).cloned()
    }

    async fn update_account(
        &self,
        account: &Account,
        expected_version: i64,
    ) -> Result<Account, StoreError> {
        self.enter().await?;
        let mut tables = self.tables.lock();
        let stored = tables
            .accounts
            .get_mut(&account.id)
            .ok_or(StoreError::AccountNotFound(account.id))?;

        if stored.version != expected_version {
            return Err(StoreError::account_conflict(account.id, expected_version));
        }

        stored.frozen = account.frozen;
        stored.metadata = account.metadata.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn adjust_supply(
        &self,
        id: AccountId,
        change_in_cents: i64,
        allow_negative: bool,
    ) -> Result<Account, StoreError> {
        self.enter().await?;
        let mut tables = self.tables.lock();
        let stored = tables
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;

        let current = stored.balance_in_cents;
        let next = apply_supply_change(current, change_in_cents, allow_negative).map_err(|e| {
            match e {
                AmountError::Overflow => StoreError::Overflow(id),
                _ => StoreError::InsufficientFunds {
                    account_id: id,
                    required: change_in_cents.saturating_neg(),
                    available: current,
                },
            }
        })?;

        stored.balance_in_cents = next;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn commit_transfer(
        &self,
        posting: &TransferPosting,
    ) -> Result<CommittedTransfer, StoreError> {
        self.enter().await?;
        let mut tables = self.tables.lock();
        let amount = posting.amount.value();

        // Validate both legs before touching either.
        let source = account_in(&tables, posting.source_account_id)?;
        if source.version != posting.source_version {
            return Err(StoreError::account_conflict(source.id, posting.source_version));
        }
        if source.frozen {
            return Err(StoreError::AccountFrozen(source.id));
        }
        if source.balance_in_cents < amount {
            return Err(StoreError::InsufficientFunds {
                account_id: source.id,
                required: amount,
                available: source.balance_in_cents,
            });
        }
        let debited = source.balance_in_cents - amount;

        let target = account_in(&tables, posting.target_account_id)?;
        if target.version != posting.target_version {
            return Err(StoreError::account_conflict(target.id, posting.target_version));
        }
        if target.frozen {
            return Err(StoreError::AccountFrozen(target.id));
        }
        let credited = target
            .balance_in_cents
            .checked_add(amount)
            .ok_or(StoreError::Overflow(target.id))?;

        let mut source = source.clone();
        source.balance_in_cents = debited;
        source.version += 1;

        let mut target = target.clone();
        target.balance_in_cents = credited;
        target.version += 1;

        tables.next_transfer_id += 1;
        let transfer = Transfer {
            id: tables.next_transfer_id,
            source_account_id: source.id,
            target_account_id: target.id,
            amount_in_cents: amount,
            created_at: posting.created_at,
        };

        tables.accounts.insert(source.id, source.clone());
        tables.accounts.insert(target.id, target.clone());
        tables.transfers.insert(transfer.id, transfer.clone());

        Ok(CommittedTransfer {
            transfer,
            source,
            target,
        })
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        self.enter().await?;
        self.tables
            .lock()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(StoreError::TransferNotFound(id))
    }

    async fn account_balances(&self) -> Result<Vec<(AccountId, i64)>, StoreError> {
        self.enter().await?;
        Ok(self
            .tables
            .lock()
            .accounts
            .values()
            .map(|a| (a.id, a.balance_in_cents))
            .collect())
    }

    async fn insert_bank(&self, bank: &Bank) -> Result<Bank, StoreError> {
        self.enter().await?;
        let mut tables = self.tables.lock();
        if tables.banks.contains_key(&bank.username) {
            return Err(StoreError::DuplicateUsername(bank.username.clone()));
        }
        let created = Bank {
            version: 1,
            ..bank.clone()
        };
        tables.banks.insert(created.username.clone(), created.clone());
        Ok(created)
    }

    async fn get_bank(&self, username: &str) -> Result<Bank, StoreError> {
        self.enter().await?;
        self.tables
            .lock()
            .banks
            .get(username)
            .cloned()
            .ok_or_else(|| StoreError::BankNotFound(username.to_string()))
    }

    async fn update_bank(&self, bank: &Bank, expected_version: i64) -> Result<Bank, StoreError> {
        self.enter().await?;
        let mut tables = self.tables.lock();
        let stored = tables
            .banks
            .get_mut(&bank.username)
            .ok_or_else(|| StoreError::BankNotFound(bank.username.clone()))?;

        if stored.version != expected_version {
            return Err(StoreError::bank_conflict(&bank.username, expected_version));
        }

        stored.admin = bank.admin;
        stored.password_hash = bank.password_hash.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Amount, Metadata};

    async fn funded(store: &MemoryLedgerStore, cents: i64) -> Account {
        let account = store
            .insert_account(&NewAccount::new("alpha", "{}").unwrap())
            .await
            .unwrap();
        if cents == 0 {
            return account;
        }
        store.adjust_supply(account.id, cents, false).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_account_starts_empty() {
        let store = MemoryLedgerStore::new();
        let account = funded(&store, 0).await;

        assert_eq!(account.id, 1);
        assert_eq!(account.balance_in_cents, 0);
        assert_eq!(account.version, 1);
        assert!(!account.frozen);
    }

    #[tokio::test]
    async fn test_update_account_cas() {
        let store = MemoryLedgerStore::new();
        let mut account = funded(&store, 0).await;
        account.frozen = true;

        let updated = store.update_account(&account, 1).await.unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.frozen);

        // Stale version is rejected
        let err = store.update_account(&account, 1).await.unwrap_err();
        assert!(err.is_edit_conflict());
    }

    #[tokio::test]
    async fn test_update_account_never_writes_balance() {
        let store = MemoryLedgerStore::new();
        let mut account = funded(&store, 500).await;
        account.balance_in_cents = 1_000_000;
        account.metadata = Metadata::parse(r#"{"tier":"gold"}"#).unwrap();

        let updated = store.update_account(&account, account.version).await.unwrap();
        assert_eq!(updated.balance_in_cents, 500);
        assert_eq!(updated.metadata.as_str(), r#"{"tier":"gold"}"#);
    }

    #[tokio::test]
    async fn test_adjust_supply_guard() {
        let store = MemoryLedgerStore::new();
        let account = funded(&store, 100).await;
        assert_eq!(account.version, 2);

        let err = store.adjust_supply(account.id, -101, false).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { required: 101, available: 100, .. }));

        let negative = store.adjust_supply(account.id, -101, true).await.unwrap();
        assert_eq!(negative.balance_in_cents, -1);
        assert_eq!(negative.version, 3);
    }

    #[tokio::test]
    async fn test_commit_transfer_moves_funds() {
        let store = MemoryLedgerStore::new();
        let source = funded(&store, 100_000).await;
        let target = funded(&store, 0).await;

        let posting =
            TransferPosting::from_snapshots(&source, &target, Amount::new(30_000).unwrap());
        let committed = store.commit_transfer(&posting).await.unwrap();

        assert_eq!(committed.source.balance_in_cents, 70_000);
        assert_eq!(committed.target.balance_in_cents, 30_000);
        assert_eq!(committed.source.version, source.version + 1);
        assert_eq!(committed.target.version, target.version + 1);
        assert_eq!(committed.transfer.amount_in_cents, 30_000);
        assert_eq!(store.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_transfer_stale_posting_changes_nothing() {
        let store = MemoryLedgerStore::new();
        let source = funded(&store, 100).await;
        let target = funded(&store, 0).await;

        let posting = TransferPosting::from_snapshots(&source, &target, Amount::new(60).unwrap());
        store.commit_transfer(&posting).await.unwrap();

        // Same snapshot again: source version moved on
        let err = store.commit_transfer(&posting).await.unwrap_err();
        assert!(err.is_edit_conflict());

        let source = store.get_account(source.id).await.unwrap();
        let target = store.get_account(target.id).await.unwrap();
        assert_eq!(source.balance_in_cents, 40);
        assert_eq!(target.balance_in_cents, 60);
        assert_eq!(store.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_transfer_insufficient() {
        let store = MemoryLedgerStore::new();
        let source = funded(&store, 10).await;
        let target = funded(&store, 0).await;

        let posting = TransferPosting::from_snapshots(&source, &target, Amount::new(11).unwrap());
        let err = store.commit_transfer(&posting).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { .. }));
        assert_eq!(store.transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_bank_rejected() {
        let store = MemoryLedgerStore::new();
        let bank = Bank {
            username: "alpha".into(),
            admin: false,
            password_hash: "hash".into(),
            version: 0,
        };

        assert_eq!(store.insert_bank(&bank).await.unwrap().version, 1);
        assert!(matches!(
            store.insert_bank(&bank).await,
            Err(StoreError::DuplicateUsername(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_store_is_unavailable() {
        let store = MemoryLedgerStore::new();
        store.set_offline(true);
        assert!(matches!(store.ping().await, Err(StoreError::Database(_))));
        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}
