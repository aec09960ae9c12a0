//! Ledger Store module
//!
//! The durable, authoritative record of accounts, transfers and banks.
//! Backends implement [`LedgerStore`]; the engine never talks to a database
//! directly.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::domain::{
    Account, AccountId, Bank, CommittedTransfer, NewAccount, Transfer, TransferId,
    TransferPosting,
};

pub use error::StoreError;
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Capabilities the ledger needs from a durable backend.
///
/// Every mutation of an account is a compare-and-swap against the version the
/// caller observed. Conflicts are reported as [`StoreError::EditConflict`] and
/// never retried here.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert an account with balance 0, not frozen, version 1.
    async fn insert_account(&self, account: &NewAccount) -> Result<Account, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError>;

    /// Persist `frozen` and `metadata` if the stored version equals
    /// `expected_version`. The balance is never written through this path.
    async fn update_account(
        &self,
        account: &Account,
        expected_version: i64,
    ) -> Result<Account, StoreError>;

    /// Apply a signed balance change against the current version.
    async fn adjust_supply(
        &self,
        id: AccountId,
        change_in_cents: i64,
        allow_negative: bool,
    ) -> Result<Account, StoreError>;

    /// Debit the source, credit the target and insert the transfer row as one
    /// unit. Both account writes are guarded by the posting's versions and the
    /// debit by the non-negative balance rule.
    async fn commit_transfer(
        &self,
        posting: &TransferPosting,
    ) -> Result<CommittedTransfer, StoreError>;

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError>;

    /// Every account's authoritative balance.
    async fn account_balances(&self) -> Result<Vec<(AccountId, i64)>, StoreError>;

    async fn insert_bank(&self, bank: &Bank) -> Result<Bank, StoreError>;

    async fn get_bank(&self, username: &str) -> Result<Bank, StoreError>;

    /// Persist `admin` and `password_hash` if the stored version equals
    /// `expected_version`.
    async fn update_bank(&self, bank: &Bank, expected_version: i64) -> Result<Bank, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Bound a store or cache call by `limit`.
///
/// An elapsed timer does not mean the operation did not happen; callers must
/// re-read state before trying again.
pub async fn with_timeout<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<tokio::time::error::Elapsed>,
{
    tokio::time::timeout(limit, fut).await?
}

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StoreError::Timeout
    }
}
