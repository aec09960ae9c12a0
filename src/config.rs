//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Idle connection lifetime in seconds
    pub database_max_idle_secs: u64,

    /// Redis URL for the balance cache and token store.
    /// Unset falls back to an in-process cache.
    pub redis_url: Option<String>,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, staging, production)
    pub environment: String,

    /// Per-operation ceiling for store and cache calls
    pub store_timeout_ms: u64,

    /// Transfer attempts before an edit conflict is surfaced
    pub transfer_max_attempts: u32,

    /// Authentication token lifetime
    pub token_ttl_hours: i64,

    /// Balance cache reconciliation period
    pub reconcile_interval_secs: u64,

    /// `text` or `json`
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let transfer_max_attempts: u32 = parse_or("TRANSFER_MAX_ATTEMPTS", "4")?;
        if transfer_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("TRANSFER_MAX_ATTEMPTS"));
        }

        Ok(Self {
            database_url,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", "50")?,
            database_max_idle_secs: parse_or("DATABASE_MAX_IDLE_SECS", "900")?,
            redis_url,
            host,
            port: parse_or("PORT", "4000")?,
            environment,
            store_timeout_ms: parse_or("STORE_TIMEOUT_MS", "5000")?,
            transfer_max_attempts,
            token_ttl_hours: parse_or("TOKEN_TTL_HOURS", "24")?,
            reconcile_interval_secs: parse_or("RECONCILE_INTERVAL_SECS", "60")?,
            log_format: parse_or("LOG_FORMAT", "text")?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Settings consumed by the ledger core
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            transfer_max_attempts: self.transfer_max_attempts,
            token_ttl: chrono::Duration::hours(self.token_ttl_hours),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
        }
    }
}

/// Tunables for the transfer engine, lifecycle manager and directory.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub store_timeout: Duration,
    pub transfer_max_attempts: u32,
    pub token_ttl: chrono::Duration,
    pub reconcile_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(5000),
            transfer_max_attempts: 4,
            token_ttl: chrono::Duration::hours(24),
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
