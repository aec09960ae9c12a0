//! Ledger Store Errors
//!
//! Error types for durable store operations.

use crate::domain::{AccountId, LedgerError, TransferId};

/// Errors that can occur in the ledger store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict
    #[error("Edit conflict on {record}: expected version {expected}")]
    EditConflict { record: String, expected: i64 },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Bank not found: {0}")]
    BankNotFound(String),

    #[error("Duplicate bank username: {0}")]
    DuplicateUsername(String),

    /// A debit or supply change would take the balance below zero
    #[error("Insufficient funds in account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: AccountId,
        required: i64,
        available: i64,
    },

    #[error("Account is frozen: {0}")]
    AccountFrozen(AccountId),

    /// Balance arithmetic left the i64 range
    #[error("Balance overflow on account {0}")]
    Overflow(AccountId),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The operation exceeded its time budget; it may or may not have applied
    #[error("Store operation timed out")]
    Timeout,
}

impl StoreError {
    pub fn account_conflict(id: AccountId, expected: i64) -> Self {
        Self::EditConflict {
            record: format!("account {}", id),
            expected,
        }
    }

    pub fn bank_conflict(username: &str, expected: i64) -> Self {
        Self::EditConflict {
            record: format!("bank {}", username),
            expected,
        }
    }

    /// Check if this error is a concurrency conflict
    pub fn is_edit_conflict(&self) -> bool {
        matches!(self, StoreError::EditConflict { .. })
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EditConflict { .. } => LedgerError::EditConflict,
            StoreError::AccountNotFound(id) => LedgerError::AccountNotFound(id),
            StoreError::TransferNotFound(id) => LedgerError::TransferNotFound(id),
            StoreError::BankNotFound(username) => LedgerError::BankNotFound(username),
            StoreError::DuplicateUsername(_) => LedgerError::validation(
                "username",
                "a bank with this username already exists",
            ),
            StoreError::InsufficientFunds {
                account_id,
                required,
                available,
            } => LedgerError::insufficient_funds(account_id, required, available),
            StoreError::AccountFrozen(account_id) => LedgerError::AccountFrozen { account_id },
            StoreError::Overflow(_) => {
                LedgerError::validation("amount_in_cents", "would overflow the account balance")
            }
            StoreError::Database(e) => LedgerError::Unavailable(e.to_string()),
            StoreError::Timeout => LedgerError::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_edit_conflict() {
        let err = StoreError::account_conflict(4, 2);
        assert!(err.is_edit_conflict());
        assert!(err.to_string().contains("account 4"));
        assert_eq!(LedgerError::from(err), LedgerError::EditConflict);
    }

    #[test]
    fn test_duplicate_username_is_validation() {
        let err = LedgerError::from(StoreError::DuplicateUsername("alpha".into()));
        match err {
            LedgerError::Validation(fields) => assert_eq!(
                fields.get("username"),
                Some("a bank with this username already exists")
            ),
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_database_error_is_unavailable() {
        let err = LedgerError::from(StoreError::Database(sqlx::Error::PoolTimedOut));
        assert!(matches!(err, LedgerError::Unavailable(_)));
    }

    #[test]
    fn test_timeout_maps_through() {
        assert_eq!(LedgerError::from(StoreError::Timeout), LedgerError::Timeout);
    }
}
