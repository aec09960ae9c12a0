//! Banks and principals
//!
//! A bank is the registered actor that controls accounts. Administrator
//! banks ("central banks") bypass the controlling-bank check everywhere.

use serde::Serialize;

use super::validator::{is_alphabetic, Validator};
use super::FieldErrors;

const MAX_USERNAME_CHARS: usize = 32;
const MIN_PASSWORD_CHARS: usize = 8;
const MAX_PASSWORD_CHARS: usize = 72;

/// Bank as persisted in the ledger store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bank {
    pub username: String,
    pub admin: bool,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(skip)]
    pub version: i64,
}

impl Bank {
    pub fn principal(&self) -> Principal {
        Principal {
            username: self.username.clone(),
            admin: self.admin,
        }
    }
}

/// Authenticated identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub username: String,
    pub admin: bool,
}

impl Principal {
    /// True if this principal is `username` or an administrator.
    pub fn can_act_for(&self, username: &str) -> bool {
        self.admin || self.username == username
    }
}

/// Outcome of resolving a request's credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    Authenticated(Principal),
}

impl Caller {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Caller::Anonymous)
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Caller::Anonymous => None,
            Caller::Authenticated(principal) => Some(principal),
        }
    }
}

pub fn validate_username(v: &mut Validator, username: &str) {
    v.check(!username.is_empty(), "username", "must be provided");
    v.check(
        username.chars().count() <= MAX_USERNAME_CHARS,
        "username",
        "must not be more than 32 characters long",
    );
    v.check(
        is_alphabetic(username),
        "username",
        "must only contain alphabetic characters - no spaces, special characters, or numbers",
    );
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    let chars = password.chars().count();
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        chars >= MIN_PASSWORD_CHARS,
        "password",
        "must be at least 8 characters long",
    );
    v.check(
        chars <= MAX_PASSWORD_CHARS,
        "password",
        "must not be more than 72 characters long",
    );
}

/// Validate a registration request
pub fn validate_registration(username: &str, password: &str) -> Result<(), FieldErrors> {
    let mut v = Validator::new();
    validate_username(&mut v, username);
    validate_password_plaintext(&mut v, password);
    v.finish()
}
