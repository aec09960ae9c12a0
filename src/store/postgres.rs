//! Postgres ledger store
//!
//! Account mutations are single guarded UPDATE statements
//! (`WHERE id = $1 AND version = $2`). A transfer locks both account rows in
//! ascending id order, validates the posting against the locked rows, writes
//! both legs and the transfer row, and commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::{
    apply_supply_change, Account, AccountId, AmountError, Bank, CommittedTransfer, Metadata,
    NewAccount, Transfer, TransferId, TransferPosting,
};

use super::{LedgerStore, StoreError};

const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    controlling_bank: String,
    metadata: String,
    balance_in_cents: i64,
    frozen: bool,
    version: i64,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            controlling_bank: row.controlling_bank,
            metadata: Metadata::from_stored(row.metadata),
            balance_in_cents: row.balance_in_cents,
            frozen: row.frozen,
            version: row.version,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: i64,
    source_account_id: i64,
    target_account_id: i64,
    amount_in_cents: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            id: row.id,
            source_account_id: row.source_account_id,
            target_account_id: row.target_account_id,
            amount_in_cents: row.amount_in_cents,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BankRow {
    username: String,
    admin: bool,
    password_hash: String,
    version: i64,
}

impl From<BankRow> for Bank {
    fn from(row: BankRow) -> Self {
        Bank {
            username: row.username,
            admin: row.admin,
            password_hash: row.password_hash,
            version: row.version,
        }
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

/// Lock contention between concurrent transfers surfaces as an edit conflict so
/// the engine re-reads and tries again.
fn contention_or(err: sqlx::Error, record: &str) -> StoreError {
    match sqlstate(&err).as_deref() {
        Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => StoreError::EditConflict {
            record: record.to_string(),
            expected: 0,
        },
        _ => StoreError::Database(err),
    }
}

/// Postgres-backed [`LedgerStore`]
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_account(
        tx: &mut Transaction<'_, Postgres>,
        id: AccountId,
    ) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, controlling_bank, metadata, balance_in_cents, frozen, version
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| contention_or(e, "account"))?;

        row.map(Account::from).ok_or(StoreError::AccountNotFound(id))
    }

    async fn write_balance(
        tx: &mut Transaction<'_, Postgres>,
        account: &Account,
        balance_in_cents: i64,
    ) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET balance_in_cents = $2, version = version + 1
            WHERE id = $1 AND version = $3
            RETURNING id, controlling_bank, metadata, balance_in_cents, frozen, version
            "#,
        )
        .bind(account.id)
        .bind(balance_in_cents)
        .bind(account.version)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| contention_or(e, "account"))?;

        row.map(Account::from)
            .ok_or_else(|| StoreError::account_conflict(account.id, account.version))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let row: AccountRow = sqlx::query_as(
            r#"
            INSERT INTO accounts (controlling_bank, metadata)
            VALUES ($1, $2)
            RETURNING id, controlling_bank, metadata, balance_in_cents, frozen, version
            "#,
        )
        .bind(&account.controlling_bank)
        .bind(account.metadata.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, controlling_bank, metadata, balance_in_cents, frozen, version
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::from).ok_or(StoreError::AccountNotFound(id))
    }

    async fn update_account(
        &self,
        account: &Account,
        expected_version: i64,
    ) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET frozen = $2, metadata = $3, version = version + 1
            WHERE id = $1 AND version = $4
            RETURNING id, controlling_bank, metadata, balance_in_cents, frozen, version
            "#,
        )
        .bind(account.id)
        .bind(account.frozen)
        .bind(account.metadata.as_str())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => {
                // Zero rows: either the account is gone or the version moved on.
                self.get_account(account.id).await?;
                Err(StoreError::account_conflict(account.id, expected_version))
            }
        }
    }

    async fn adjust_supply(
        &self,
        id: AccountId,
        change_in_cents: i64,
        allow_negative: bool,
    ) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_account(&mut tx, id).await?;

        let next = apply_supply_change(current.balance_in_cents, change_in_cents, allow_negative)
            .map_err(|e| match e {
                AmountError::Overflow => StoreError::Overflow(id),
                _ => StoreError::InsufficientFunds {
                    account_id: id,
                    required: change_in_cents.saturating_neg(),
                    available: current.balance_in_cents,
                },
            })?;

        let updated = Self::write_balance(&mut tx, &current, next).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn commit_transfer(
        &self,
        posting: &TransferPosting,
    ) -> Result<CommittedTransfer, StoreError> {
        let amount = posting.amount.value();
        let mut tx = self.pool.begin().await?;

        // Lock in ascending id order so opposing transfers cannot deadlock.
        let (first, second) = if posting.source_account_id < posting.target_account_id {
            (posting.source_account_id, posting.target_account_id)
        } else {
            (posting.target_account_id, posting.source_account_id)
        };
        let first = Self::lock_account(&mut tx, first).await?;
        let second = Self::lock_account(&mut tx, second).await?;
        let (source, target) = if first.id == posting.source_account_id {
            (first, second)
        } else {
            (second, first)
        };

        if source.version != posting.source_version {
            return Err(StoreError::account_conflict(source.id, posting.source_version));
        }
        if target.version != posting.target_version {
            return Err(StoreError::account_conflict(target.id, posting.target_version));
        }
        if source.frozen {
            return Err(StoreError::AccountFrozen(source.id));
        }
        if target.frozen {
            return Err(StoreError::AccountFrozen(target.id));
        }
        if source.balance_in_cents < amount {
            return Err(StoreError::InsufficientFunds {
                account_id: source.id,
                required: amount,
                available: source.balance_in_cents,
            });
        }
        let credited = target
            .balance_in_cents
            .checked_add(amount)
            .ok_or(StoreError::Overflow(target.id))?;

        let source = Self::write_balance(&mut tx, &source, source.balance_in_cents - amount).await?;
        let target = Self::write_balance(&mut tx, &target, credited).await?;

        let row: TransferRow = sqlx::query_as(
            r#"
            INSERT INTO transfers (source_account_id, target_account_id, amount_in_cents, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, source_account_id, target_account_id, amount_in_cents, created_at
            "#,
        )
        .bind(source.id)
        .bind(target.id)
        .bind(amount)
        .bind(posting.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| contention_or(e, "transfer"))?;

        Ok(CommittedTransfer {
            transfer: row.into(),
            source,
            target,
        })
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        let row: Option<TransferRow> = sqlx::query_as(
            r#"
            SELECT id, source_account_id, target_account_id, amount_in_cents, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Transfer::from).ok_or(StoreError::TransferNotFound(id))
    }

    async fn account_balances(&self) -> Result<Vec<(AccountId, i64)>, StoreError> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, balance_in_cents FROM accounts ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn insert_bank(&self, bank: &Bank) -> Result<Bank, StoreError> {
        let row: BankRow = sqlx::query_as(
            r#"
            INSERT INTO banks (username, admin, password_hash)
            VALUES ($1, $2, $3)
            RETURNING username, admin, password_hash, version
            "#,
        )
        .bind(&bank.username)
        .bind(bank.admin)
        .bind(&bank.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match sqlstate(&e).as_deref() {
            Some(UNIQUE_VIOLATION) => StoreError::DuplicateUsername(bank.username.clone()),
            _ => StoreError::Database(e),
        })?;

        Ok(row.into())
    }

    async fn get_bank(&self, username: &str) -> Result<Bank, StoreError> {
        let row: Option<BankRow> = sqlx::query_as(
            r#"
            SELECT username, admin, password_hash, version
            FROM banks
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Bank::from)
            .ok_or_else(|| StoreError::BankNotFound(username.to_string()))
    }

    async fn update_bank(&self, bank: &Bank, expected_version: i64) -> Result<Bank, StoreError> {
        let row: Option<BankRow> = sqlx::query_as(
            r#"
            UPDATE banks
            SET admin = $2, password_hash = $3, version = version + 1
            WHERE username = $1 AND version = $4
            RETURNING username, admin, password_hash, version
            "#,
        )
        .bind(&bank.username)
        .bind(bank.admin)
        .bind(&bank.password_hash)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => {
                self.get_bank(&bank.username).await?;
                Err(StoreError::bank_conflict(&bank.username, expected_version))
            }
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
