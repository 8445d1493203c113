//! Transactional storage contract for the ledger.
//!
//! Every mutation happens inside a [`StoreTransaction`]. Row locks taken with
//! [`StoreTransaction::get_account_by_id_for_update`] are held until the unit
//! of work commits or rolls back, and dropping an uncommitted unit of work
//! rolls it back.

use async_trait::async_trait;
use ledgerline_common::{AccountId, Result, Timestamp, TransactionId};
use rust_decimal::Decimal;

use crate::account::Account;
use crate::journal::TransactionRecord;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Default page size for transaction listings.
pub const DEFAULT_PAGE_LIMIT: i64 = 10;

/// Pagination window for transaction listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Maximum number of records.
    pub limit: i64,
    /// Records to skip.
    pub offset: i64,
}

impl Page {
    /// Build a page, falling back to the defaults for absent or out-of-range values.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_LIMIT),
            offset: offset.filter(|o| *o >= 0).unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Shared handle on a transactional ledger store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Read an active account without locking it.
    async fn get_account_by_id(&self, id: &AccountId) -> Result<Option<Account>>;

    /// Read a transaction record.
    async fn get_transaction_by_id(&self, id: &TransactionId) -> Result<Option<TransactionRecord>>;

    /// Records for one account, newest first.
    async fn get_transactions_by_account_id(
        &self,
        id: &AccountId,
        page: Page,
    ) -> Result<Vec<TransactionRecord>>;

    /// Records across all accounts, newest first.
    async fn get_all_transactions(&self, page: Page) -> Result<Vec<TransactionRecord>>;

    /// Mark an account deleted. Returns `false` if no active account matched.
    async fn soft_delete_account(&self, id: &AccountId) -> Result<bool>;
}

/// One atomic unit of work against a [`LedgerStore`].
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert a new account.
    async fn create_account(&mut self, account: &Account) -> Result<()>;

    /// Lock an active account row for the rest of this unit of work.
    async fn get_account_by_id_for_update(&mut self, id: &AccountId) -> Result<Option<Account>>;

    /// Set the balance of an account locked or created by this unit of work.
    async fn update_account_balance(
        &mut self,
        id: &AccountId,
        balance: Decimal,
        at: Timestamp,
    ) -> Result<()>;

    /// Append a transaction record. The owning account must exist.
    async fn create_transaction(&mut self, record: &TransactionRecord) -> Result<()>;

    /// Find the reversal of a record, committed or pending in this unit of work.
    async fn find_reversal_of(&mut self, id: &TransactionId) -> Result<Option<TransactionRecord>>;

    /// Make every write visible atomically and release the row locks.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write and release the row locks.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
