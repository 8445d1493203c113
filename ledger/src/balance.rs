//! Account balance views.

use ledgerline_common::{AccountId, LedgerError, Result, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Account;

/// Account balance at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Account identifier.
    pub account_id: AccountId,
    /// Committed balance.
    pub balance: Decimal,
    /// When this balance last changed.
    pub updated_at: Timestamp,
}

impl From<&Account> for AccountBalance {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id,
            balance: account.balance,
            updated_at: account.updated_at,
        }
    }
}

/// Fail with `InsufficientBalance` unless the account can cover `amount`.
pub fn ensure_sufficient(account: &Account, amount: Decimal) -> Result<()> {
    if account.balance < amount {
        return Err(LedgerError::InsufficientBalance {
            account_id: account.id,
            required: amount,
            available: account.balance,
        });
    }
    Ok(())
}
