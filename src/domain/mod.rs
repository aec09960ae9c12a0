//! Domain module
//!
//! Core ledger types and business rules.

pub mod account;
pub mod amount;
pub mod bank;
pub mod context;
pub mod error;
pub mod transfer;
pub mod validator;

/// Store-assigned account identifier
pub type AccountId = i64;

/// Store-assigned transfer identifier
pub type TransferId = i64;

pub use account::{Account, Metadata, NewAccount};
pub use amount::{apply_supply_change, Amount, AmountError, Balance};
pub use bank::{Bank, Caller, Principal};
pub use context::OperationContext;
pub use error::LedgerError;
pub use transfer::{CommittedTransfer, Transfer, TransferPosting, TransferRequest};
pub use validator::{FieldErrors, Validator};
