//! reserva - ledger service
//!
//! Banks hold accounts; transfers move integer cents between them under
//! optimistic concurrency. Balances are mirrored into a fast cache.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reserva::api;
use reserva::auth::Argon2Hasher;
use reserva::cache::{BalanceCache, MemoryCache, RedisCache, TokenStore};
use reserva::config::LogFormat;
use reserva::db;
use reserva::jobs::{rebuild_balance_cache, JobScheduler, JobSchedulerConfig};
use reserva::store::{LedgerStore, PgLedgerStore};
use reserva::{AppState, Config};

/// Initialize tracing/logging
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reserva=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let settings = config.engine_settings();

    tracing::info!(environment = %config.environment, "Starting reserva server");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .idle_timeout(Duration::from_secs(config.database_max_idle_secs))
        .acquire_timeout(settings.store_timeout)
        .connect(&config.database_url)
        .await?;

    db::migrate(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!("Database connected successfully");

    let (cache, tokens): (Arc<dyn BalanceCache>, Arc<dyn TokenStore>) = match &config.redis_url {
        Some(url) => {
            let redis = Arc::new(RedisCache::connect(url).await?);
            redis.ping().await?;
            tracing::info!("Redis connected successfully");
            let cache: Arc<dyn BalanceCache> = redis.clone();
            (cache, redis as Arc<dyn TokenStore>)
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-process balance cache and token store");
            let memory = Arc::new(MemoryCache::new());
            let cache: Arc<dyn BalanceCache> = memory.clone();
            (cache, memory as Arc<dyn TokenStore>)
        }
    };

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let state = AppState::new(
        store.clone(),
        cache.clone(),
        tokens,
        Arc::new(Argon2Hasher::new()),
        settings,
        config.environment.clone(),
    );

    // Warm the balance cache before serving reads
    rebuild_balance_cache(store.as_ref(), cache.as_ref(), settings.store_timeout).await?;

    let scheduler = JobScheduler::new(
        store,
        cache,
        state.reconcile.clone(),
        JobSchedulerConfig::from(&settings),
    )
    .start();

    let app = api::build_router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    scheduler.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
