//! Scheduled Jobs
//!
//! Background maintenance that brings the balance cache back in line with the
//! ledger store after propagation failures.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::cache::{BalanceCache, CacheError, ReconcileQueue};
use crate::config::EngineSettings;
use crate::store::{with_timeout, LedgerStore, StoreError};

// =========================================================================
// Reconcile pending accounts
// =========================================================================

/// Overwrite the cached balance of every queued account with the store's.
///
/// Accounts that fail are queued again. If the store balance moved while the
/// overwrite was in flight the account is queued again too, since the
/// concurrent delta may have been applied before the overwrite.
pub async fn reconcile_pending(
    store: &dyn LedgerStore,
    cache: &dyn BalanceCache,
    queue: &ReconcileQueue,
    timeout: Duration,
) -> Result<u64, JobError> {
    let pending = queue.drain();
    if pending.is_empty() {
        return Ok(0);
    }

    let mut reconciled = 0;
    let mut first_error = None;

    for id in pending {
        let result = async {
            let account = with_timeout(timeout, store.get_account(id)).await?;
            with_timeout(timeout, cache.set_balance(id, account.balance_in_cents)).await?;
            let after = with_timeout(timeout, store.get_account(id)).await?;
            Ok::<bool, JobError>(after.version == account.version)
        }
        .await;

        match result {
            Ok(true) => reconciled += 1,
            Ok(false) => queue.mark(id),
            Err(JobError::Store(StoreError::AccountNotFound(_))) => {
                tracing::warn!(account_id = id, "Dropping unknown account from reconcile queue");
            }
            Err(e) => {
                queue.mark(id);
                first_error.get_or_insert(e);
            }
        }
    }

    if reconciled > 0 {
        tracing::info!(
            accounts_reconciled = reconciled,
            still_pending = queue.len(),
            "Reconciled cached balances"
        );
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(reconciled),
    }
}

// =========================================================================
// Rebuild balance cache
// =========================================================================

/// Overwrite every account's cached balance from the store. Run at startup.
pub async fn rebuild_balance_cache(
    store: &dyn LedgerStore,
    cache: &dyn BalanceCache,
    timeout: Duration,
) -> Result<u64, JobError> {
    let balances = with_timeout(timeout, store.account_balances()).await?;

    let mut written = 0;
    for (id, balance) in balances {
        with_timeout(timeout, cache.set_balance(id, balance)).await?;
        written += 1;
    }

    tracing::info!(accounts = written, "Balance cache rebuilt");
    Ok(written)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for draining the reconcile queue (default: 1 minute)
    pub reconcile_interval: Duration,
    /// Bound on each store or cache call
    pub call_timeout: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for JobSchedulerConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            reconcile_interval: settings.reconcile_interval,
            call_timeout: settings.store_timeout,
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    queue: Arc<ReconcileQueue>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn BalanceCache>,
        queue: Arc<ReconcileQueue>,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            config,
        }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!(
            interval_secs = self.config.reconcile_interval.as_secs(),
            "Job scheduler started"
        );

        let mut reconcile_interval = interval(self.config.reconcile_interval);

        loop {
            reconcile_interval.tick().await;
            if let Err(e) = reconcile_pending(
                self.store.as_ref(),
                self.cache.as_ref(),
                &self.queue,
                self.config.call_timeout,
            )
            .await
            {
                tracing::error!(error = %e, pending = self.queue.len(), "Balance reconcile failed");
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match reconcile_pending(
            self.store.as_ref(),
            self.cache.as_ref(),
            &self.queue,
            self.config.call_timeout,
        )
        .await
        {
            Ok(count) => report.accounts_reconciled = count,
            Err(e) => report.errors.push(format!("Balance reconcile: {}", e)),
        }

        report.still_pending = self.queue.len();
        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub accounts_reconciled: u64,
    pub still_pending: usize,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

// =========================================================================
// Tests
// =========================================================================
