//! Bank Handler
//!
//! Registration, lookup and secret/admin-flag updates for banks.

use std::sync::Arc;

use crate::auth::{hash_secret, SecretHasher};
use crate::config::EngineSettings;
use crate::domain::bank::{validate_password_plaintext, validate_registration};
use crate::domain::{Bank, LedgerError, OperationContext, Principal, Validator};
use crate::store::{with_timeout, LedgerStore, StoreError};

use super::{RegisterBankCommand, UpdateBankCommand};

pub(super) const BANK_EDIT_ATTEMPTS: u32 = 2;

#[derive(Clone)]
pub struct BankHandler {
    store: Arc<dyn LedgerStore>,
    hasher: Arc<dyn SecretHasher>,
    settings: EngineSettings,
}

impl BankHandler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        hasher: Arc<dyn SecretHasher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            hasher,
            settings,
        }
    }

    /// Register a bank. Administrators only.
    pub async fn register(
        &self,
        principal: &Principal,
        command: RegisterBankCommand,
        context: &OperationContext,
    ) -> Result<Bank, LedgerError> {
        if !principal.admin {
            return Err(LedgerError::NotPermitted);
        }
        self.register_unchecked(command, context).await
    }

    /// Register a bank without an acting principal. Used to bootstrap the
    /// first administrator.
    pub async fn register_unchecked(
        &self,
        command: RegisterBankCommand,
        context: &OperationContext,
    ) -> Result<Bank, LedgerError> {
        validate_registration(&command.username, &command.password)?;

        let bank = Bank {
            username: command.username,
            admin: command.admin,
            password_hash: hash_secret(&self.hasher, &command.password).await?,
            version: 0,
        };

        let bank = with_timeout(self.settings.store_timeout, self.store.insert_bank(&bank)).await?;

        tracing::info!(
            bank = %bank.username,
            admin = bank.admin,
            correlation_id = ?context.correlation_id,
            "Bank registered"
        );

        Ok(bank)
    }

    /// The bank itself or an administrator.
    pub async fn show(&self, principal: &Principal, username: &str) -> Result<Bank, LedgerError> {
        if !principal.can_act_for(username) {
            return Err(LedgerError::NotPermitted);
        }
        Ok(with_timeout(self.settings.store_timeout, self.store.get_bank(username)).await?)
    }

    /// Rotate the secret and/or change the admin flag. Only administrators may
    /// change the admin flag.
    pub async fn update(
        &self,
        principal: &Principal,
        command: UpdateBankCommand,
        context: &OperationContext,
    ) -> Result<Bank, LedgerError> {
        if !principal.can_act_for(&command.username) {
            return Err(LedgerError::NotPermitted);
        }
        if command.admin.is_some() && !principal.admin {
            return Err(LedgerError::NotPermitted);
        }

        let password_hash = match &command.password {
            Some(password) => {
                let mut v = Validator::new();
                validate_password_plaintext(&mut v, password);
                v.finish()?;
                Some(hash_secret(&self.hasher, password).await?)
            }
            None => None,
        };

        let mut attempt = 1;
        let bank = loop {
            let mut bank =
                with_timeout(self.settings.store_timeout, self.store.get_bank(&command.username))
                    .await?;
            let expected_version = bank.version;

            if let Some(hash) = &password_hash {
                bank.password_hash = hash.clone();
            }
            if let Some(admin) = command.admin {
                bank.admin = admin;
            }

            match with_timeout(
                self.settings.store_timeout,
                self.store.update_bank(&bank, expected_version),
            )
            .await
            {
                Ok(updated) => break updated,
                Err(StoreError::EditConflict { .. }) if attempt < BANK_EDIT_ATTEMPTS => {
                    tracing::warn!(bank = %command.username, attempt, "Bank edit conflict, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        tracing::info!(
            bank = %bank.username,
            admin = bank.admin,
            secret_rotated = password_hash.is_some(),
            by = %principal.username,
            correlation_id = ?context.correlation_id,
            "Bank updated"
        );

        Ok(bank)
    }
}
