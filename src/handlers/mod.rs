//! Command Handlers module
//!
//! The ledger core: the transfer engine, the account lifecycle manager and
//! bank management. Handlers take a resolved principal plus a command and
//! return a domain value or a typed [`LedgerError`](crate::domain::LedgerError).

mod account_handler;
mod balance_sync;
mod bank_handler;
mod commands;
mod transfer_handler;


pub use account_handler::AccountLifecycle;
pub use balance_sync::BalanceSync;
pub use bank_handler::BankHandler;
pub use commands::*;
pub use transfer_handler::TransferEngine;
