//! Account record
//!
//! An account is held by exactly one controlling bank. Its balance only moves
//! through transfers and administrative supply adjustments; every committed
//! mutation bumps `version` by one.

use serde::Serialize;
use std::fmt;

use super::bank::Principal;
use super::validator::{is_json, FieldErrors, Validator};
use super::{AccountId, Amount, Balance, LedgerError};

/// Opaque account metadata. Always a well-formed JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Metadata(String);

impl Metadata {
    /// Validate caller supplied metadata.
    pub fn parse(raw: impl Into<String>) -> Result<Self, FieldErrors> {
        let raw = raw.into();
        let mut v = Validator::new();
        v.check(!raw.trim().is_empty(), "metadata", "must be provided");
        v.check(is_json(&raw), "metadata", "must be valid JSON");
        v.finish()?;
        Ok(Self(raw))
    }

    /// Wrap metadata read back from the durable store, which only ever holds
    /// values that passed `parse`.
    pub fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input for account creation
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub controlling_bank: String,
    pub metadata: Metadata,
}

impl NewAccount {
    pub fn new(controlling_bank: &str, metadata: &str) -> Result<Self, FieldErrors> {
        let mut v = Validator::new();
        v.check(
            !controlling_bank.is_empty(),
            "controlling_bank",
            "must be provided",
        );
        v.check(!metadata.trim().is_empty(), "metadata", "must be provided");
        v.check(is_json(metadata), "metadata", "must be valid JSON");
        v.finish()?;

        Ok(Self {
            controlling_bank: controlling_bank.to_string(),
            metadata: Metadata(metadata.to_string()),
        })
    }
}

/// Account as persisted in the ledger store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub controlling_bank: String,
    pub metadata: Metadata,
    pub balance_in_cents: i64,
    pub frozen: bool,
    pub version: i64,
}

impl Account {
    /// The controlling bank or any administrator may manage the account.
    pub fn is_managed_by(&self, principal: &Principal) -> bool {
        principal.admin || self.controlling_bank == principal.username
    }

    /// Verify the account can be debited by `amount`.
    pub fn ensure_can_debit(&self, amount: &Amount) -> Result<(), LedgerError> {
        if self.frozen {
            return Err(LedgerError::AccountFrozen { account_id: self.id });
        }

        let sufficient = Balance::new(self.balance_in_cents)
            .map(|balance| balance.is_sufficient_for(amount))
            .unwrap_or(false);
        if !sufficient {
            return Err(LedgerError::insufficient_funds(
                self.id,
                amount.value(),
                self.balance_in_cents,
            ));
        }

        Ok(())
    }

    /// Verify the account can be credited by `amount`.
    pub fn ensure_can_credit(&self, amount: &Amount) -> Result<(), LedgerError> {
        if self.frozen {
            return Err(LedgerError::AccountFrozen { account_id: self.id });
        }

        if self.balance_in_cents.checked_add(amount.value()).is_none() {
            return Err(LedgerError::validation(
                "amount_in_cents",
                "would overflow the target balance",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(balance: i64, frozen: bool) -> Account {
        Account {
            id: 1,
            controlling_bank: "alpha".to_string(),
            metadata: Metadata::parse("{}").unwrap(),
            balance_in_cents: balance,
            frozen,
            version: 1,
        }
    }

    fn principal(username: &str, admin: bool) -> Principal {
        Principal {
            username: username.to_string(),
            admin,
        }
    }

    #[test]
    fn test_metadata_must_be_json() {
        assert!(Metadata::parse(r#"{"name": "savings"}"#).is_ok());

        let errors = Metadata::parse("not json").unwrap_err();
        assert_eq!(errors.get("metadata"), Some("must be valid JSON"));

        let errors = Metadata::parse("").unwrap_err();
        assert_eq!(errors.get("metadata"), Some("must be provided"));
    }

    #[test]
    fn test_new_account_validation() {
        let new = NewAccount::new("alpha", "{}").unwrap();
        assert_eq!(new.controlling_bank, "alpha");

        let errors = NewAccount::new("", "{oops").unwrap_err();
        assert_eq!(errors.get("controlling_bank"), Some("must be provided"));
        assert_eq!(errors.get("metadata"), Some("must be valid JSON"));
    }

    #[test]
    fn test_managed_by_controller_or_admin() {
        let account = account(0, false);
        assert!(account.is_managed_by(&principal("alpha", false)));
        assert!(account.is_managed_by(&principal("central", true)));
        assert!(!account.is_managed_by(&principal("beta", false)));
    }

    #[test]
    fn test_debit_checks() {
        let amount = Amount::new(70_000).unwrap();

        assert!(account(70_000, false).ensure_can_debit(&amount).is_ok());
        assert_eq!(
            account(69_999, false).ensure_can_debit(&amount),
            Err(LedgerError::insufficient_funds(1, 70_000, 69_999))
        );
        assert_eq!(
            account(70_000, true).ensure_can_debit(&amount),
            Err(LedgerError::AccountFrozen { account_id: 1 })
        );
    }

    #[test]
    fn test_debit_from_negative_balance_rejected() {
        let amount = Amount::new(1).unwrap();
        assert!(matches!(
            account(-10, false).ensure_can_debit(&amount),
            Err(LedgerError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_credit_checks() {
        let amount = Amount::new(1).unwrap();
        assert!(account(0, false).ensure_can_credit(&amount).is_ok());
        assert!(matches!(
            account(0, true).ensure_can_credit(&amount),
            Err(LedgerError::AccountFrozen { .. })
        ));
        assert!(matches!(
            account(i64::MAX, false).ensure_can_credit(&amount),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_account_serializes_metadata_as_string() {
        let json = serde_json::to_value(account(5, false)).unwrap();
        assert_eq!(json["metadata"], "{}");
        assert_eq!(json["balance_in_cents"], 5);
        assert_eq!(json["frozen"], false);
    }
}
