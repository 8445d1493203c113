//! In-process ledger store.
//!
//! Tables live behind a single read/write lock and are only ever written at
//! commit, so readers see either the state before a unit of work or the state
//! after it. Row locks are per-account async mutexes held by the unit of work
//! until it ends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ledgerline_common::{now, AccountId, LedgerError, Result, Timestamp, TransactionId};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::{LedgerStore, Page, StoreTransaction};
use crate::account::Account;
use crate::journal::TransactionRecord;

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    /// Records in commit order.
    transactions: Vec<TransactionRecord>,
    by_id: HashMap<TransactionId, usize>,
    /// Original record -> its reversal.
    reversals: HashMap<TransactionId, TransactionId>,
}

impl Tables {
    fn newest_first<'a>(
        &'a self,
        filter: impl Fn(&TransactionRecord) -> bool,
        page: Page,
    ) -> Vec<TransactionRecord> {
        let mut matching: Vec<(usize, &'a TransactionRecord)> = self
            .transactions
            .iter()
            .enumerate()
            .filter(|(_, record)| filter(record))
            .collect();

        matching.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));

        matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

struct Inner {
    tables: RwLock<Tables>,
    row_locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl Inner {
    /// Lock for a committed account row. Ids with no row get none, so the
    /// lock table only grows with the accounts table.
    fn row_lock(&self, id: &AccountId) -> Option<Arc<Mutex<()>>> {
        if !self.tables.read().accounts.contains_key(id) {
            return None;
        }
        Some(self.row_locks.entry(*id).or_default().clone())
    }
}

/// Ledger store kept in process memory.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
            }),
        }
    }

    /// Number of committed transaction records.
    pub fn transaction_count(&self) -> usize {
        self.inner.tables.read().transactions.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            held: HashMap::new(),
            rows: HashMap::new(),
            created: HashSet::new(),
            dirty: HashSet::new(),
            records: Vec::new(),
        }))
    }

    async fn get_account_by_id(&self, id: &AccountId) -> Result<Option<Account>> {
        let tables = self.inner.tables.read();
        Ok(tables.accounts.get(id).filter(|a| a.is_active()).cloned())
    }

    async fn get_transaction_by_id(&self, id: &TransactionId) -> Result<Option<TransactionRecord>> {
        let tables = self.inner.tables.read();
        Ok(tables
            .by_id
            .get(id)
            .map(|&index| tables.transactions[index].clone()))
    }

    async fn get_transactions_by_account_id(
        &self,
        id: &AccountId,
        page: Page,
    ) -> Result<Vec<TransactionRecord>> {
        let tables = self.inner.tables.read();
        Ok(tables.newest_first(|record| record.account_id == *id, page))
    }

    async fn get_all_transactions(&self, page: Page) -> Result<Vec<TransactionRecord>> {
        let tables = self.inner.tables.read();
        Ok(tables.newest_first(|_| true, page))
    }

    async fn soft_delete_account(&self, id: &AccountId) -> Result<bool> {
        let Some(row) = self.inner.row_lock(id) else {
            return Ok(false);
        };
        let _row = row.lock_owned().await;

        let mut tables = self.inner.tables.write();
        match tables.accounts.get_mut(id) {
            Some(account) if account.is_active() => {
                let at = now();
                account.deleted_at = Some(at);
                account.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Unit of work over a [`MemoryStore`].
struct MemoryTransaction {
    inner: Arc<Inner>,
    /// Row locks held until the unit of work ends.
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    /// Working copies of locked or created accounts.
    rows: HashMap<AccountId, Account>,
    created: HashSet<AccountId>,
    dirty: HashSet<AccountId>,
    records: Vec<TransactionRecord>,
}

impl MemoryTransaction {
    fn account_exists(&self, id: &AccountId) -> bool {
        if self.rows.contains_key(id) {
            return true;
        }
        let tables = self.inner.tables.read();
        tables.accounts.get(id).map_or(false, |a| a.is_active())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn create_account(&mut self, account: &Account) -> Result<()> {
        let exists = self.rows.contains_key(&account.id)
            || self.inner.tables.read().accounts.contains_key(&account.id);
        if exists {
            return Err(LedgerError::storage(format!(
                "duplicate key: account {} already exists",
                account.id
            )));
        }

        self.rows.insert(account.id, account.clone());
        self.created.insert(account.id);
        Ok(())
    }

    async fn get_account_by_id_for_update(&mut self, id: &AccountId) -> Result<Option<Account>> {
        if let Some(account) = self.rows.get(id) {
            return Ok(Some(account.clone()));
        }

        if !self.held.contains_key(id) {
            let Some(row) = self.inner.row_lock(id) else {
                return Ok(None);
            };
            let guard = row.lock_owned().await;
            self.held.insert(*id, guard);
            debug!(account_id = %id, "Row lock acquired");
        }

        let account = {
            let tables = self.inner.tables.read();
            tables.accounts.get(id).filter(|a| a.is_active()).cloned()
        };
        if let Some(account) = &account {
            self.rows.insert(*id, account.clone());
        }
        Ok(account)
    }

    async fn update_account_balance(
        &mut self,
        id: &AccountId,
        balance: Decimal,
        at: Timestamp,
    ) -> Result<()> {
        let account = self.rows.get_mut(id).ok_or_else(|| {
            LedgerError::storage(format!("account {id} is not locked by this unit of work"))
        })?;
        if balance < Decimal::ZERO {
            return Err(LedgerError::storage(format!(
                "check constraint violated: balance of account {id} would be negative"
            )));
        }

        account.set_balance(balance, at);
        self.dirty.insert(*id);
        Ok(())
    }

    async fn create_transaction(&mut self, record: &TransactionRecord) -> Result<()> {
        if !self.account_exists(&record.account_id) {
            return Err(LedgerError::storage(format!(
                "foreign key violation: account {} does not exist",
                record.account_id
            )));
        }
        if record.amount <= Decimal::ZERO {
            return Err(LedgerError::storage(
                "check constraint violated: amount must be positive",
            ));
        }

        self.records.push(record.clone());
        Ok(())
    }

    async fn find_reversal_of(&mut self, id: &TransactionId) -> Result<Option<TransactionRecord>> {
        if let Some(pending) = self.records.iter().find(|r| r.reversal_of == Some(*id)) {
            return Ok(Some(pending.clone()));
        }

        let tables = self.inner.tables.read();
        Ok(tables
            .reversals
            .get(id)
            .and_then(|reversal_id| tables.by_id.get(reversal_id))
            .map(|&index| tables.transactions[index].clone()))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        {
            let mut tables = this.inner.tables.write();

            for id in this.created.iter().chain(this.dirty.iter()) {
                if let Some(account) = this.rows.get(id) {
                    tables.accounts.insert(*id, account.clone());
                }
            }

            for record in this.records {
                let index = tables.transactions.len();
                tables.by_id.insert(record.id, index);
                if let Some(original) = record.reversal_of {
                    tables.reversals.insert(original, record.id);
                }
                tables.transactions.push(record);
            }
        }

        // Row locks release here, after the writes are visible.
        drop(this.held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
