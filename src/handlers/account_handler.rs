//! Account Lifecycle Manager
//!
//! Account creation, reads, freeze/unfreeze, metadata edits and administrative
//! supply adjustment. Field edits follow load, mutate, compare-and-swap; a
//! conflict is retried once from a fresh read before it is surfaced.
//!
//! Callers that do not manage an account get `AccountNotFound` rather than a
//! permission error, so account ids cannot be probed.

use std::sync::Arc;

use crate::config::EngineSettings;
use crate::domain::{
    Account, AccountId, LedgerError, Metadata, NewAccount, OperationContext, Principal, Transfer,
    TransferId,
};
use crate::store::{with_timeout, LedgerStore, StoreError};

use super::{
    AdjustSupplyCommand, BalanceSync, CreateAccountCommand, SetFrozenCommand, SetMetadataCommand,
};

pub(super) const FIELD_EDIT_ATTEMPTS: u32 = 2;

#[derive(Clone)]
pub struct AccountLifecycle {
    store: Arc<dyn LedgerStore>,
    balances: BalanceSync,
    settings: EngineSettings,
}

impl AccountLifecycle {
    pub fn new(store: Arc<dyn LedgerStore>, balances: BalanceSync, settings: EngineSettings) -> Self {
        Self {
            store,
            balances,
            settings,
        }
    }

    // =========================================================================
    // CreateAccount
    // =========================================================================

    pub async fn create(
        &self,
        principal: &Principal,
        command: CreateAccountCommand,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        let new_account = NewAccount::new(&principal.username, &command.metadata)?;

        let account =
            with_timeout(self.settings.store_timeout, self.store.insert_account(&new_account))
                .await?;

        self.balances.overwrite(&account).await;

        tracing::info!(
            account_id = account.id,
            bank = %account.controlling_bank,
            correlation_id = ?context.correlation_id,
            "Account created"
        );

        Ok(account)
    }

    // =========================================================================
    // GetAccount
    // =========================================================================

    /// Account as seen by `principal`, balance served from the cache when the
    /// cache holds it.
    pub async fn get(&self, principal: &Principal, id: AccountId) -> Result<Account, LedgerError> {
        let mut account = self.load_managed(principal, id).await?;

        let cache = self.balances.cache();
        match with_timeout(self.balances.timeout(), cache.get_balance(id)).await {
            Ok(Some(cached)) => account.balance_in_cents = cached,
            Ok(None) => self.balances.repopulate(&account).await,
            Err(e) => {
                tracing::warn!(account_id = id, error = %e, "Balance cache read failed, serving store balance");
            }
        }

        Ok(account)
    }

    // =========================================================================
    // SetFrozen / SetMetadata
    // =========================================================================

    pub async fn set_frozen(
        &self,
        principal: &Principal,
        command: SetFrozenCommand,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        let account = self
            .edit_fields(principal, command.account_id, |account| {
                account.frozen = command.frozen;
            })
            .await?;

        tracing::info!(
            account_id = account.id,
            frozen = account.frozen,
            bank = %principal.username,
            correlation_id = ?context.correlation_id,
            "Account frozen flag updated"
        );

        Ok(account)
    }

    pub async fn set_metadata(
        &self,
        principal: &Principal,
        command: SetMetadataCommand,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        let metadata = Metadata::parse(command.metadata)?;

        let account = self
            .edit_fields(principal, command.account_id, |account| {
                account.metadata = metadata.clone();
            })
            .await?;

        tracing::info!(
            account_id = account.id,
            bank = %principal.username,
            correlation_id = ?context.correlation_id,
            "Account metadata updated"
        );

        Ok(account)
    }

    // =========================================================================
    // AdjustSupply
    // =========================================================================

    /// Create (`change > 0`) or destroy (`change < 0`) money on one account.
    /// Administrators only.
    pub async fn adjust_supply(
        &self,
        principal: &Principal,
        command: AdjustSupplyCommand,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        if !principal.admin {
            return Err(LedgerError::NotPermitted);
        }
        if command.change_in_cents == 0 {
            return Err(LedgerError::validation("change_in_cents", "must not be zero"));
        }

        let account = with_timeout(
            self.settings.store_timeout,
            self.store.adjust_supply(
                command.account_id,
                command.change_in_cents,
                command.allow_negative,
            ),
        )
        .await?;

        self.balances
            .apply_delta(&account, command.change_in_cents)
            .await;

        tracing::info!(
            account_id = account.id,
            change_in_cents = command.change_in_cents,
            balance_in_cents = account.balance_in_cents,
            bank = %principal.username,
            correlation_id = ?context.correlation_id,
            "Money supply adjusted"
        );

        Ok(account)
    }

    // =========================================================================
    // GetTransfer
    // =========================================================================

    /// Visible to administrators and to the controller of either side.
    pub async fn get_transfer(
        &self,
        principal: &Principal,
        id: TransferId,
    ) -> Result<Transfer, LedgerError> {
        let transfer =
            with_timeout(self.settings.store_timeout, self.store.get_transfer(id)).await?;
        if principal.admin {
            return Ok(transfer);
        }

        for account_id in [transfer.source_account_id, transfer.target_account_id] {
            let account = self.load(account_id).await?;
            if account.is_managed_by(principal) {
                return Ok(transfer);
            }
        }

        Err(LedgerError::TransferNotFound(id))
    }

    async fn load(&self, id: AccountId) -> Result<Account, LedgerError> {
        Ok(with_timeout(self.settings.store_timeout, self.store.get_account(id)).await?)
    }

    async fn load_managed(
        &self,
        principal: &Principal,
        id: AccountId,
    ) -> Result<Account, LedgerError> {
        let account = self.load(id).await?;
        if !account.is_managed_by(principal) {
            return Err(LedgerError::AccountNotFound(id));
        }
        Ok(account)
    }

    async fn edit_fields<F>(
        &self,
        principal: &Principal,
        id: AccountId,
        mutate: F,
    ) -> Result<Account, LedgerError>
    where
        F: Fn(&mut Account),
    {
        let mut attempt = 1;
        loop {
            let mut account = self.load_managed(principal, id).await?;
            let expected_version = account.version;
            mutate(&mut account);

            match with_timeout(
                self.settings.store_timeout,
                self.store.update_account(&account, expected_version),
            )
            .await
            {
                Ok(updated) => return Ok(updated),
                Err(StoreError::EditConflict { .. }) if attempt < FIELD_EDIT_ATTEMPTS => {
                    tracing::warn!(account_id = id, attempt, "Account edit conflict, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BalanceCache, MemoryCache, ReconcileQueue};
    use crate::store::MemoryLedgerStore;

    fn lifecycle() -> (AccountLifecycle, Arc<MemoryLedgerStore>, Arc<MemoryCache>) {
        let store = Arc::new(MemoryLedgerStore::new());
        let cache = Arc::new(MemoryCache::new());
        let settings = EngineSettings::default();
        let balances = BalanceSync::new(
            cache.clone(),
            Arc::new(ReconcileQueue::new()),
            settings.store_timeout,
        );
        (
            AccountLifecycle::new(store.clone(), balances, settings),
            store,
            cache,
        )
    }

    fn bank(name: &str) -> Principal {
        Principal {
            username: name.into(),
            admin: false,
        }
    }

    fn admin() -> Principal {
        Principal {
            username: "central".into(),
            admin: true,
        }
    }

    #[tokio::test]
    async fn test_create_account_is_owned_by_caller_and_cached() {
        let (lifecycle, _, cache) = lifecycle();
        let ctx = OperationContext::new();

        let account = lifecycle
            .create(&bank("alpha"), CreateAccountCommand::new(r#"{"kind":"savings"}"#), &ctx)
            .await
            .unwrap();

        assert_eq!(account.controlling_bank, "alpha");
        assert_eq!(account.balance_in_cents, 0);
        assert_eq!(account.version, 1);
        assert_eq!(cache.get_balance(account.id).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_create_account_rejects_bad_metadata() {
        let (lifecycle, _, _) = lifecycle();
        let err = lifecycle
            .create(&bank("alpha"), CreateAccountCommand::new("{nope"), &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_hides_foreign_accounts() {
        let (lifecycle, _, _) = lifecycle();
        let ctx = OperationContext::new();
        let account = lifecycle
            .create(&bank("alpha"), CreateAccountCommand::new("{}"), &ctx)
            .await
            .unwrap();

        assert_eq!(
            lifecycle.get(&bank("beta"), account.id).await.unwrap_err(),
            LedgerError::AccountNotFound(account.id)
        );
        assert!(lifecycle.get(&admin(), account.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_repopulates_cache_on_miss() {
        let (lifecycle, _, cache) = lifecycle();
        let ctx = OperationContext::new();
        let account = lifecycle
            .create(&bank("alpha"), CreateAccountCommand::new("{}"), &ctx)
            .await
            .unwrap();
        lifecycle
            .adjust_supply(&admin(), AdjustSupplyCommand::new(account.id, 500), &ctx)
            .await
            .unwrap();
        cache.evict(account.id);

        let fetched = lifecycle.get(&bank("alpha"), account.id).await.unwrap();
        assert_eq!(fetched.balance_in_cents, 500);
        assert_eq!(cache.get_balance(account.id).await.unwrap(), Some(500));
    }

    #[tokio::test]
    async fn test_set_frozen_bumps_version() {
        let (lifecycle, _, _) = lifecycle();
        let ctx = OperationContext::new();
        let account = lifecycle
            .create(&bank("alpha"), CreateAccountCommand::new("{}"), &ctx)
            .await
            .unwrap();

        let frozen = lifecycle
            .set_frozen(&bank("alpha"), SetFrozenCommand::new(account.id, true), &ctx)
            .await
            .unwrap();
        assert!(frozen.frozen);
        assert_eq!(frozen.version, account.version + 1);

        let err = lifecycle
            .set_frozen(&bank("beta"), SetFrozenCommand::new(account.id, false), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound(account.id));
    }

    #[tokio::test]
    async fn test_set_metadata_validates_json() {
        let (lifecycle, _, _) = lifecycle();
        let ctx = OperationContext::new();
        let account = lifecycle
            .create(&bank("alpha"), CreateAccountCommand::new("{}"), &ctx)
            .await
            .unwrap();

        let updated = lifecycle
            .set_metadata(&bank("alpha"), SetMetadataCommand::new(account.id, "[1,2]"), &ctx)
            .await
            .unwrap();
        assert_eq!(updated.metadata.as_str(), "[1,2]");

        let err = lifecycle
            .set_metadata(&bank("alpha"), SetMetadataCommand::new(account.id, "[1,"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_adjust_supply_rules() {
        let (lifecycle, _, cache) = lifecycle();
        let ctx = OperationContext::new();
        let account = lifecycle
            .create(&bank("alpha"), CreateAccountCommand::new("{}"), &ctx)
            .await
            .unwrap();

        assert_eq!(
            lifecycle
                .adjust_supply(&bank("alpha"), AdjustSupplyCommand::new(account.id, 10), &ctx)
                .await
                .unwrap_err(),
            LedgerError::NotPermitted
        );
        assert!(matches!(
            lifecycle
                .adjust_supply(&admin(), AdjustSupplyCommand::new(account.id, 0), &ctx)
                .await,
            Err(LedgerError::Validation(_))
        ));

        let funded = lifecycle
            .adjust_supply(&admin(), AdjustSupplyCommand::new(account.id, 100_000), &ctx)
            .await
            .unwrap();
        assert_eq!(funded.balance_in_cents, 100_000);
        assert_eq!(funded.version, 2);
        assert_eq!(cache.get_balance(account.id).await.unwrap(), Some(100_000));

        assert!(matches!(
            lifecycle
                .adjust_supply(&admin(), AdjustSupplyCommand::new(account.id, -100_001), &ctx)
                .await,
            Err(LedgerError::InsufficientFunds { .. })
        ));

        let overdrawn = lifecycle
            .adjust_supply(
                &admin(),
                AdjustSupplyCommand::new(account.id, -100_001).allow_negative(),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(overdrawn.balance_in_cents, -1);
    }
}
