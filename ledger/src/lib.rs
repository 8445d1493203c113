//! Ledgerline Ledger Engine
//!
//! Double-entry ledger with atomic transfers, deterministic lock ordering and
//! pluggable transactional stores.

pub mod engine;
pub mod account;
pub mod journal;
pub mod balance;
pub mod store;

pub use engine::{lock_order, ExecutionLock, LedgerEngine, OpenedAccount, TransferRequest};
pub use account::Account;
pub use journal::{EntryType, TransactionRecord, TransferReceipt};
pub use balance::AccountBalance;
pub use store::{LedgerStore, Page, StoreTransaction};
