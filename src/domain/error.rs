//! Domain Error Types
//!
//! Pure ledger errors that don't depend on the HTTP layer.

use thiserror::Error;

use super::validator::FieldErrors;
use super::{AccountId, TransferId};

/// Ledger errors returned by the engine.
///
/// Business-rule rejections are never retried. `EditConflict` is retried
/// locally by the engine and only surfaces once its attempts are exhausted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// Malformed input
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Bank not found: {0}")]
    BankNotFound(String),

    /// The principal may not act on this resource
    #[error("You do not have permission to perform this action")]
    NotPermitted,

    #[error("Account is frozen: {account_id}")]
    AccountFrozen { account_id: AccountId },

    #[error("Insufficient funds in account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: AccountId,
        required: i64,
        available: i64,
    },

    /// Optimistic concurrency collision
    #[error("Unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("Invalid authentication credentials")]
    InvalidCredentials,

    #[error("Invalid or missing authentication token")]
    InvalidToken,

    /// Infrastructure failure
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Operation timed out")]
    Timeout,
}

impl LedgerError {
    /// Single-field validation error
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation(FieldErrors::single(field, message))
    }

    /// Create an insufficient funds error
    pub fn insufficient_funds(account_id: AccountId, required: i64, available: i64) -> Self {
        Self::InsufficientFunds {
            account_id,
            required,
            available,
        }
    }

    /// Check if this is a client error (caller's fault, never retried)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::AccountNotFound(_)
                | Self::TransferNotFound(_)
                | Self::BankNotFound(_)
                | Self::NotPermitted
                | Self::AccountFrozen { .. }
                | Self::InsufficientFunds { .. }
                | Self::InvalidCredentials
                | Self::InvalidToken
        )
    }

    /// Check if retrying after re-reading state may help
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EditConflict | Self::Timeout | Self::Unavailable(_))
    }
}

impl From<FieldErrors> for LedgerError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}
