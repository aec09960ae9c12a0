//! Bank secrets
//!
//! Verification is behind [`SecretHasher`] so the directory never depends on a
//! particular hashing scheme. Hashing is CPU-bound; async callers go through
//! [`hash_secret`] and [`verify_secret`], which run it on the blocking pool.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::domain::LedgerError;

pub trait SecretHasher: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String, LedgerError>;

    /// False for a wrong secret and for an unparseable hash.
    fn verify(&self, secret: &str, hash: &str) -> bool;
}

/// Argon2id in PHC string format.
#[derive(Clone, Default)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimal cost parameters for test suites and the load harness.
    pub fn low_cost() -> Self {
        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, 1, None)
            .unwrap_or_default();
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }
}

impl SecretHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, LedgerError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| LedgerError::Unavailable(format!("secret hashing failed: {}", e)))
    }

    fn verify(&self, secret: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!("Stored secret hash is unparseable: {}", e);
                false
            }
        }
    }
}

/// Hash `secret` on the blocking thread pool.
pub async fn hash_secret(
    hasher: &Arc<dyn SecretHasher>,
    secret: &str,
) -> Result<String, LedgerError> {
    let hasher = hasher.clone();
    let secret = secret.to_owned();
    tokio::task::spawn_blocking(move || hasher.hash(&secret))
        .await
        .map_err(|e| LedgerError::Unavailable(format!("secret hashing task failed: {}", e)))?
}

/// Verify `secret` against `hash` on the blocking thread pool.
pub async fn verify_secret(
    hasher: &Arc<dyn SecretHasher>,
    secret: &str,
    hash: &str,
) -> Result<bool, LedgerError> {
    let hasher = hasher.clone();
    let secret = secret.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || hasher.verify(&secret, &hash))
        .await
        .map_err(|e| LedgerError::Unavailable(format!("secret verification task failed: {}", e)))
}
