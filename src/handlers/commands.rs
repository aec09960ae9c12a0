//! Command definitions
//!
//! Commands represent intentions to change the ledger. They carry raw caller
//! input; validation happens in the handler that executes them.

use std::fmt;

use crate::domain::AccountId;

// =========================================================================
// Accounts
// =========================================================================

/// Command to open an account controlled by the requesting bank
#[derive(Debug, Clone)]
pub struct CreateAccountCommand {
    pub metadata: String,
}

impl CreateAccountCommand {
    pub fn new(metadata: impl Into<String>) -> Self {
        Self {
            metadata: metadata.into(),
        }
    }
}

/// Command to freeze or unfreeze an account
#[derive(Debug, Clone, Copy)]
pub struct SetFrozenCommand {
    pub account_id: AccountId,
    pub frozen: bool,
}

impl SetFrozenCommand {
    pub fn new(account_id: AccountId, frozen: bool) -> Self {
        Self { account_id, frozen }
    }
}

/// Command to replace an account's metadata document
#[derive(Debug, Clone)]
pub struct SetMetadataCommand {
    pub account_id: AccountId,
    pub metadata: String,
}

impl SetMetadataCommand {
    pub fn new(account_id: AccountId, metadata: impl Into<String>) -> Self {
        Self {
            account_id,
            metadata: metadata.into(),
        }
    }
}

/// Command to create or destroy money on one account
#[derive(Debug, Clone, Copy)]
pub struct AdjustSupplyCommand {
    pub account_id: AccountId,
    pub change_in_cents: i64,
    /// Permit the resulting balance to go below zero
    pub allow_negative: bool,
}

impl AdjustSupplyCommand {
    pub fn new(account_id: AccountId, change_in_cents: i64) -> Self {
        Self {
            account_id,
            change_in_cents,
            allow_negative: false,
        }
    }

    pub fn allow_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }
}

// =========================================================================
// Transfers
// =========================================================================

/// Command to move funds between two accounts
#[derive(Debug, Clone, Copy)]
pub struct TransferCommand {
    pub source_account_id: AccountId,
    pub target_account_id: AccountId,
    pub amount_in_cents: i64,
}

impl TransferCommand {
    pub fn new(
        source_account_id: AccountId,
        target_account_id: AccountId,
        amount_in_cents: i64,
    ) -> Self {
        Self {
            source_account_id,
            target_account_id,
            amount_in_cents,
        }
    }
}

// =========================================================================
// Banks
// =========================================================================

/// Command to register a new bank
#[derive(Clone)]
pub struct RegisterBankCommand {
    pub username: String,
    pub password: String,
    pub admin: bool,
}

impl RegisterBankCommand {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            admin: false,
        }
    }

    pub fn as_admin(mut self) -> Self {
        self.admin = true;
        self
    }
}

impl fmt::Debug for RegisterBankCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterBankCommand")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("admin", &self.admin)
            .finish()
    }
}

/// Command to rotate a bank's secret or change its admin flag
#[derive(Clone)]
pub struct UpdateBankCommand {
    pub username: String,
    pub password: Option<String>,
    pub admin: Option<bool>,
}

impl UpdateBankCommand {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            admin: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = Some(admin);
        self
    }
}

impl fmt::Debug for UpdateBankCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateBankCommand")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("admin", &self.admin)
            .finish()
    }
}
