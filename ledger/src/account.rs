//! Account definitions for ledger.

use ledgerline_common::{now, AccountId, LedgerError, Result, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum length of an account owner's name, in characters.
pub const OWNER_NAME_MAX_LEN: usize = 100;

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Name of the account holder.
    pub owner_name: String,
    /// Current balance. Never negative between units of work.
    pub balance: Decimal,
    /// When the account was created.
    pub created_at: Timestamp,
    /// When the balance last changed.
    pub updated_at: Timestamp,
    /// Soft-delete marker; deleted accounts behave as absent.
    #[serde(skip)]
    pub deleted_at: Option<Timestamp>,
}

impl Account {
    /// Create a new account with the given opening balance.
    pub fn new(owner_name: impl Into<String>, balance: Decimal) -> Self {
        let now = now();

        Self {
            id: AccountId::new(),
            owner_name: owner_name.into(),
            balance,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Check if the account is live (not soft-deleted).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Apply a new balance.
    pub fn set_balance(&mut self, balance: Decimal, at: Timestamp) {
        self.balance = balance;
        self.updated_at = at;
    }
}

/// Validate and normalize an owner name.
pub fn validate_owner_name(owner_name: &str) -> Result<String> {
    let trimmed = owner_name.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::invalid_field(
            "owner name cannot be empty",
            "owner_name",
        ));
    }
    if trimmed.chars().count() > OWNER_NAME_MAX_LEN {
        return Err(LedgerError::invalid_field(
            format!("owner name cannot exceed {OWNER_NAME_MAX_LEN} characters"),
            "owner_name",
        ));
    }
    Ok(trimmed.to_string())
}
