//! Transfer record
//!
//! A committed transfer always corresponds to exactly one debit on the source
//! and one credit on the target, persisted in the same atomic unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validator::Validator;
use super::{Account, AccountId, Amount, FieldErrors, TransferId};

/// Transfer as persisted in the ledger store. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub source_account_id: AccountId,
    pub target_account_id: AccountId,
    pub amount_in_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// Validated transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub source_account_id: AccountId,
    pub target_account_id: AccountId,
    pub amount: Amount,
}

impl TransferRequest {
    pub fn new(
        source_account_id: AccountId,
        target_account_id: AccountId,
        amount_in_cents: i64,
    ) -> Result<Self, FieldErrors> {
        let mut v = Validator::new();
        v.check(source_account_id != 0, "source_account_id", "must be provided");
        v.check(target_account_id != 0, "target_account_id", "must be provided");
        v.check(amount_in_cents != 0, "amount_in_cents", "must be provided");
        v.check(amount_in_cents > 0, "amount_in_cents", "must be greater than 0");
        v.check(
            source_account_id != target_account_id,
            "target_account_id",
            "must be different from source_account_id",
        );
        v.finish()?;

        let amount = Amount::new(amount_in_cents)
            .map_err(|e| FieldErrors::single("amount_in_cents", e.to_string()))?;

        Ok(Self {
            source_account_id,
            target_account_id,
            amount,
        })
    }
}

/// The atomic unit the store commits for one transfer: a debit and a credit,
/// each guarded by the version the engine observed, plus the transfer row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPosting {
    pub source_account_id: AccountId,
    pub source_version: i64,
    pub target_account_id: AccountId,
    pub target_version: i64,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

impl TransferPosting {
    /// Build a posting from the account snapshots the funds check ran against.
    pub fn from_snapshots(source: &Account, target: &Account, amount: Amount) -> Self {
        Self {
            source_account_id: source.id,
            source_version: source.version,
            target_account_id: target.id,
            target_version: target.version,
            amount,
            created_at: Utc::now(),
        }
    }
}

/// Result of a committed posting: the transfer row and both accounts as they
/// were written.
#[derive(Debug, Clone)]
pub struct CommittedTransfer {
    pub transfer: Transfer,
    pub source: Account,
    pub target: Account,
}
