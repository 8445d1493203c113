//! Transaction records for double-entry bookkeeping.

use ledgerline_common::{now, AccountId, LedgerError, Result, Timestamp, TransactionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum length of a transaction description, in characters.
pub const DESCRIPTION_MAX_LEN: usize = 255;

/// Description written on the credit that funds a newly opened account.
pub const INITIAL_BALANCE_DESCRIPTION: &str = "Initial balance";

/// Type of transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Money leaves the account.
    Debit,
    /// Money enters the account.
    Credit,
}

impl EntryType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "DEBIT",
            EntryType::Credit => "CREDIT",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEBIT" => Some(EntryType::Debit),
            "CREDIT" => Some(EntryType::Credit),
            _ => None,
        }
    }

    /// The entry type that undoes this one.
    pub fn opposite(&self) -> Self {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }
}

/// A single append-only transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique record ID.
    pub id: TransactionId,
    /// Account affected.
    pub account_id: AccountId,
    /// Debit or credit.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Amount, always positive.
    pub amount: Decimal,
    /// Free-text description.
    pub description: String,
    /// Record this one reverses, if it is a reversal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_of: Option<TransactionId>,
    /// When this record was created.
    pub created_at: Timestamp,
}

impl TransactionRecord {
    /// Create a debit record.
    pub fn debit(account_id: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self::entry(account_id, EntryType::Debit, amount, description)
    }

    /// Create a credit record.
    pub fn credit(account_id: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self::entry(account_id, EntryType::Credit, amount, description)
    }

    /// Create the record that reverses `self`.
    pub fn reversal(&self) -> Self {
        let mut record = Self::entry(
            self.account_id,
            self.entry_type.opposite(),
            self.amount,
            format!("Reversal of transaction {}", self.id),
        );
        record.reversal_of = Some(self.id);
        record
    }

    fn entry(
        account_id: AccountId,
        entry_type: EntryType,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            account_id,
            entry_type,
            amount,
            description: description.into(),
            reversal_of: None,
            created_at: now(),
        }
    }

    /// Signed effect on the account balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Debit => -self.amount,
            EntryType::Credit => self.amount,
        }
    }

    /// Check whether this record reverses another.
    pub fn is_reversal(&self) -> bool {
        self.reversal_of.is_some()
    }
}

/// The linked pair written by one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Debit on the source account.
    pub debit: TransactionRecord,
    /// Credit on the destination account.
    pub credit: TransactionRecord,
}

impl TransferReceipt {
    /// Check the pair is balanced: same amount and description, opposite sides.
    pub fn is_balanced(&self) -> bool {
        self.debit.entry_type == EntryType::Debit
            && self.credit.entry_type == EntryType::Credit
            && self.debit.amount == self.credit.amount
            && self.debit.description == self.credit.description
            && self.debit.signed_amount() + self.credit.signed_amount() == Decimal::ZERO
    }
}

/// Validate a transaction description.
pub fn validate_description(description: &str) -> Result<()> {
    if description.chars().count() > DESCRIPTION_MAX_LEN {
        return Err(LedgerError::invalid_field(
            format!("description cannot exceed {DESCRIPTION_MAX_LEN} characters"),
            "description",
        ));
    }
    Ok(())
}
