//! Redis cache backend
//!
//! Balances live at `accounts/{id}` as plain integers. Tokens live at
//! `tokens/{sha256-hex}` as hashes that Redis expires on its own.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;

use crate::domain::AccountId;

use super::{BalanceCache, CacheError, TokenRecord, TokenStore};

/// Cache key prefixes
pub mod keys {
    pub const ACCOUNT_BALANCE: &str = "accounts";
    pub const TOKEN: &str = "tokens";

    pub fn balance(id: i64) -> String {
        format!("{}/{}", ACCOUNT_BALANCE, id)
    }

    pub fn token(hash: &str) -> String {
        format!("{}/{}", TOKEN, hash)
    }
}

/// INCRBY only when the key already exists; returns nil on a miss.
const ADJUST_IF_PRESENT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('INCRBY', KEYS[1], ARGV[1])
end
return false
"#;

#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
    adjust: redis::Script,
}

impl RedisCache {
    pub fn new(redis: ConnectionManager) -> Self {
        RedisCache {
            redis,
            adjust: redis::Script::new(ADJUST_IF_PRESENT),
        }
    }

    /// Open a managed connection to `url`.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager))
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let _: String = redis::cmd("PING").query_async(&mut self.redis.clone()).await?;
        Ok(())
    }
}

fn token_from_fields(
    key: &str,
    hash: &str,
    mut fields: HashMap<String, String>,
) -> Result<TokenRecord, CacheError> {
    let corrupt = |reason: &str| CacheError::Corrupt {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let username = fields.remove("username").ok_or_else(|| corrupt("missing username"))?;
    let admin = fields
        .get("admin")
        .map(|v| v == "1")
        .ok_or_else(|| corrupt("missing admin"))?;
    let expiry = fields
        .get("expiry")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .ok_or_else(|| corrupt("missing or invalid expiry"))?;

    Ok(TokenRecord {
        hash: hash.to_string(),
        username,
        admin,
        expiry,
    })
}

#[async_trait]
impl BalanceCache for RedisCache {
    async fn set_balance(&self, id: AccountId, balance_in_cents: i64) -> Result<(), CacheError> {
        let _: () = self
            .redis
            .clone()
            .set(keys::balance(id), balance_in_cents)
            .await?;
        Ok(())
    }

    async fn get_balance(&self, id: AccountId) -> Result<Option<i64>, CacheError> {
        Ok(self.redis.clone().get(keys::balance(id)).await?)
    }

    async fn adjust_balance(&self, id: AccountId, delta: i64) -> Result<Option<i64>, CacheError> {
        let mut conn = self.redis.clone();
        let value: Option<i64> = self
            .adjust
            .key(keys::balance(id))
            .arg(delta)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl TokenStore for RedisCache {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), CacheError> {
        let key = keys::token(&record.hash);
        let admin = if record.admin { "1" } else { "0" };
        let expiry = record.expiry.timestamp();

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    ("username", record.username.clone()),
                    ("admin", admin.to_string()),
                    ("expiry", expiry.to_string()),
                ],
            )
            .ignore()
            .expire_at(&key, expiry.max(0))
            .ignore()
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(())
    }

    async fn get_token(&self, hash: &str) -> Result<Option<TokenRecord>, CacheError> {
        let key = keys::token(hash);
        let fields: HashMap<String, String> = self.redis.clone().hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let record = token_from_fields(&key, hash, fields)?;
        if record.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(record))
    }
}
