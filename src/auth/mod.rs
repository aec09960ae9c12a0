//! Principal Directory
//!
//! Resolves bearer tokens to principals and issues new tokens against a
//! bank's secret. Tokens carry a denormalized copy of the bank's admin flag, so
//! authenticating a request never touches the durable store.

pub mod password;
pub mod token;

use chrono::Utc;
use std::sync::Arc;

use crate::cache::{TokenRecord, TokenStore};
use crate::config::EngineSettings;
use crate::domain::{Caller, LedgerError, Principal};
use crate::store::{with_timeout, LedgerStore, StoreError};

pub use password::{hash_secret, verify_secret, Argon2Hasher, SecretHasher};
pub use token::IssuedToken;

#[derive(Clone)]
pub struct PrincipalDirectory {
    store: Arc<dyn LedgerStore>,
    tokens: Arc<dyn TokenStore>,
    hasher: Arc<dyn SecretHasher>,
    settings: EngineSettings,
}

impl PrincipalDirectory {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        tokens: Arc<dyn TokenStore>,
        hasher: Arc<dyn SecretHasher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
            settings,
        }
    }

    pub fn hasher(&self) -> &Arc<dyn SecretHasher> {
        &self.hasher
    }

    // =========================================================================
    // Authenticate
    // =========================================================================

    /// Resolve the raw `Authorization` header value.
    ///
    /// No header is an anonymous caller. A malformed header, a token of the
    /// wrong shape, an unknown token and an expired token are all
    /// `InvalidToken`.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Caller, LedgerError> {
        let header = match header {
            None => return Ok(Caller::Anonymous),
            Some(h) => h,
        };

        let plaintext = token::parse_bearer(header).ok_or(LedgerError::InvalidToken)?;
        if !token::is_well_formed(plaintext) {
            return Err(LedgerError::InvalidToken);
        }

        let hash = token::hash_plaintext(plaintext);
        let record = with_timeout(self.settings.store_timeout, self.tokens.get_token(&hash))
            .await?
            .ok_or(LedgerError::InvalidToken)?;

        if record.is_expired(Utc::now()) {
            return Err(LedgerError::InvalidToken);
        }

        Ok(Caller::Authenticated(Principal {
            username: record.username,
            admin: record.admin,
        }))
    }

    // =========================================================================
    // IssueToken
    // =========================================================================

    /// Verify `password` for `username` and mint a token.
    pub async fn issue_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<IssuedToken, LedgerError> {
        let bank = match with_timeout(self.settings.store_timeout, self.store.get_bank(username))
            .await
        {
            Ok(bank) => bank,
            Err(StoreError::BankNotFound(_)) => return Err(LedgerError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        if !verify_secret(&self.hasher, password, &bank.password_hash).await? {
            return Err(LedgerError::InvalidCredentials);
        }

        let plaintext = token::generate_plaintext();
        let record = TokenRecord {
            hash: token::hash_plaintext(&plaintext),
            username: bank.username.clone(),
            admin: bank.admin,
            expiry: Utc::now() + self.settings.token_ttl,
        };

        with_timeout(self.settings.store_timeout, self.tokens.insert_token(&record)).await?;

        tracing::info!(bank = %bank.username, expiry = %record.expiry, "Issued authentication token");

        Ok(IssuedToken {
            plaintext,
            expiry: record.expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::domain::Bank;
    use crate::store::MemoryLedgerStore;

    async fn directory() -> (PrincipalDirectory, Arc<MemoryCache>) {
        let store = Arc::new(MemoryLedgerStore::new());
        let cache = Arc::new(MemoryCache::new());
        let hasher = Arc::new(Argon2Hasher::low_cost());

        store
            .insert_bank(&Bank {
                username: "alpha".into(),
                admin: false,
                password_hash: hasher.hash("password123").unwrap(),
                version: 0,
            })
            .await
            .unwrap();

        let directory =
            PrincipalDirectory::new(store, cache.clone(), hasher, EngineSettings::default());
        (directory, cache)
    }

    #[tokio::test]
    async fn test_missing_header_is_anonymous() {
        let (directory, _) = directory().await;
        assert_eq!(directory.authenticate(None).await.unwrap(), Caller::Anonymous);
    }

    #[tokio::test]
    async fn test_issue_then_authenticate() {
        let (directory, _) = directory().await;
        let issued = directory.issue_token("alpha", "password123").await.unwrap();
        assert_eq!(issued.plaintext.len(), 32);

        let header = format!("Bearer {}", issued.plaintext);
        let caller = directory.authenticate(Some(&header)).await.unwrap();
        assert_eq!(
            caller,
            Caller::Authenticated(Principal {
                username: "alpha".into(),
                admin: false,
            })
        );
    }

    #[tokio::test]
    async fn test_wrong_credentials_are_indistinguishable() {
        let (directory, _) = directory().await;
        assert_eq!(
            directory.issue_token("alpha", "wrongpassword").await.unwrap_err(),
            LedgerError::InvalidCredentials
        );
        assert_eq!(
            directory.issue_token("nobody", "password123").await.unwrap_err(),
            LedgerError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn test_invalid_tokens() {
        let (directory, _) = directory().await;

        let unknown = format!("Bearer {}", "0".repeat(32));
        for header in ["Token abc", "Bearer short", unknown.as_str()] {
            assert_eq!(
                directory.authenticate(Some(header)).await.unwrap_err(),
                LedgerError::InvalidToken,
                "header {:?}",
                header
            );
        }
    }

    #[tokio::test]
    async fn test_token_store_outage_is_unavailable() {
        let (directory, cache) = directory().await;
        cache.set_offline(true);
        let header = format!("Bearer {}", "a".repeat(32));
        assert!(matches!(
            directory.authenticate(Some(&header)).await,
            Err(LedgerError::Unavailable(_))
        ));
    }
}
