//! reserva Library
//!
//! Re-exports modules for integration testing and the bundled binaries.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod handlers;
pub mod jobs;
pub mod state;
pub mod store;

mod error;

pub use config::{Config, EngineSettings};
pub use domain::{Account, Amount, Bank, LedgerError, OperationContext, Principal, Transfer};
pub use error::{AppError, AppResult, ErrorResponse};
pub use state::AppState;
