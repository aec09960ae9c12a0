//! Shared application state
//!
//! One instance is built at startup and cloned into every request.

use std::sync::Arc;

use crate::auth::{PrincipalDirectory, SecretHasher};
use crate::cache::{BalanceCache, ReconcileQueue, TokenStore};
use crate::config::EngineSettings;
use crate::handlers::{AccountLifecycle, BalanceSync, BankHandler, TransferEngine};
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub cache: Arc<dyn BalanceCache>,
    pub reconcile: Arc<ReconcileQueue>,
    pub directory: PrincipalDirectory,
    pub accounts: AccountLifecycle,
    pub transfers: TransferEngine,
    pub banks: BankHandler,
    pub settings: EngineSettings,
    pub environment: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn BalanceCache>,
        tokens: Arc<dyn TokenStore>,
        hasher: Arc<dyn SecretHasher>,
        settings: EngineSettings,
        environment: impl Into<String>,
    ) -> Self {
        let reconcile = Arc::new(ReconcileQueue::new());
        let balances = BalanceSync::new(cache.clone(), reconcile.clone(), settings.store_timeout);

        Self {
            directory: PrincipalDirectory::new(store.clone(), tokens, hasher.clone(), settings),
            accounts: AccountLifecycle::new(store.clone(), balances.clone(), settings),
            transfers: TransferEngine::new(store.clone(), balances, settings),
            banks: BankHandler::new(store.clone(), hasher, settings),
            store,
            cache,
            reconcile,
            settings,
            environment: environment.into(),
        }
    }
}
