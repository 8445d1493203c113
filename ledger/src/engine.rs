//! Core ledger engine implementation.
//!
//! Every balance-changing operation runs as one unit of work against the
//! store. Transfers lock both account rows in [`lock_order`] so that two
//! transfers over the same pair in opposite directions cannot wait on each
//! other, and an optional [`ExecutionLock`] serializes whole operations
//! process-wide on top of the row locks.

use std::sync::Arc;

use ledgerline_common::{
    now, validate_amount, validate_initial_balance, AccountId, LedgerError, Result, TransactionId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

use crate::account::{validate_owner_name, Account};
use crate::balance::ensure_sufficient;
use crate::journal::{
    validate_description, EntryType, TransactionRecord, TransferReceipt,
    INITIAL_BALANCE_DESCRIPTION,
};
use crate::store::{LedgerStore, StoreTransaction};

/// Process-wide critical section around balance-changing operations.
///
/// Injected into the engine so tests can run it with row locks only.
pub struct ExecutionLock {
    inner: Option<Mutex<()>>,
}

impl ExecutionLock {
    /// A lock that admits one operation at a time.
    pub fn exclusive() -> Self {
        Self {
            inner: Some(Mutex::new(())),
        }
    }

    /// A lock that never blocks; only store row locks apply.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Build from a configuration flag.
    pub fn new(serialize: bool) -> Self {
        if serialize {
            Self::exclusive()
        } else {
            Self::disabled()
        }
    }

    /// Whether operations are serialized.
    pub fn is_exclusive(&self) -> bool {
        self.inner.is_some()
    }

    /// Enter the critical section. The guard is `None` when disabled.
    pub async fn acquire(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.inner {
            Some(mutex) => Some(mutex.lock().await),
            None => None,
        }
    }
}

/// Return the pair in the order their row locks must be taken.
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A request to move money between two accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Account to debit.
    pub from_account_id: AccountId,
    /// Account to credit.
    pub to_account_id: AccountId,
    /// Amount to move.
    pub amount: Decimal,
    /// Description copied onto both records.
    pub description: String,
}

impl TransferRequest {
    /// Create a new transfer request.
    pub fn new(
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            description: description.into(),
        }
    }

    /// Reject requests that can never succeed.
    pub fn validate(&self) -> Result<()> {
        validate_amount(self.amount, "amount")?;
        validate_description(&self.description)?;
        if self.from_account_id == self.to_account_id {
            return Err(LedgerError::invalid_field(
                "cannot transfer to the same account",
                "to_account_id",
            ));
        }
        Ok(())
    }
}

/// Result of opening an account.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedAccount {
    /// The new account.
    pub account: Account,
    /// Credit that funded it, when the opening balance was positive.
    pub initial_credit: Option<TransactionRecord>,
}

/// The ledger engine applies double-entry changes atomically.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    execution_lock: Arc<ExecutionLock>,
}

impl LedgerEngine {
    /// Create a new ledger engine.
    pub fn new(store: Arc<dyn LedgerStore>, execution_lock: Arc<ExecutionLock>) -> Self {
        Self {
            store,
            execution_lock,
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Open an account and record its opening credit in one unit of work.
    #[instrument(skip(self))]
    pub async fn open_account(
        &self,
        owner_name: &str,
        initial_balance: Decimal,
    ) -> Result<OpenedAccount> {
        let owner_name = validate_owner_name(owner_name)?;
        let initial_balance = validate_initial_balance(initial_balance)?;

        let account = Account::new(owner_name, initial_balance);
        let initial_credit = (initial_balance > Decimal::ZERO).then(|| {
            TransactionRecord::credit(account.id, initial_balance, INITIAL_BALANCE_DESCRIPTION)
        });

        let mut tx = self.store.begin().await?;
        let result = apply_open(tx.as_mut(), &account, initial_credit.as_ref()).await;
        finish(tx, result).await?;

        info!(
            account_id = %account.id,
            initial_balance = %initial_balance,
            "Account opened"
        );

        Ok(OpenedAccount {
            account,
            initial_credit,
        })
    }

    /// Move `amount` from one account to another.
    #[instrument(
        skip(self, request),
        fields(
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = %request.amount
        )
    )]
    pub async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt> {
        request.validate()?;

        let _serialized = self.execution_lock.acquire().await;

        let mut tx = self.store.begin().await?;
        let result = apply_transfer(tx.as_mut(), request).await;
        let receipt = finish(tx, result).await.map_err(|e| {
            warn!(error = %e, "Transfer rejected");
            e
        })?;

        info!(
            debit_id = %receipt.debit.id,
            credit_id = %receipt.credit.id,
            "Transfer committed"
        );

        Ok(receipt)
    }

    /// Undo a transaction record by writing its opposite.
    #[instrument(skip(self))]
    pub async fn reverse(&self, transaction_id: TransactionId) -> Result<TransactionRecord> {
        let _serialized = self.execution_lock.acquire().await;

        let original = self
            .store
            .get_transaction_by_id(&transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;

        if original.is_reversal() {
            return Err(LedgerError::NotReversible(transaction_id));
        }

        let mut tx = self.store.begin().await?;
        let result = apply_reversal(tx.as_mut(), &original).await;
        let reversal = finish(tx, result).await.map_err(|e| {
            warn!(error = %e, "Reversal rejected");
            e
        })?;

        info!(
            account_id = %reversal.account_id,
            reversal_id = %reversal.id,
            "Reversal committed"
        );

        Ok(reversal)
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Box<dyn StoreTransaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

async fn apply_open(
    tx: &mut dyn StoreTransaction,
    account: &Account,
    initial_credit: Option<&TransactionRecord>,
) -> Result<()> {
    tx.create_account(account).await?;
    if let Some(credit) = initial_credit {
        tx.create_transaction(credit).await?;
    }
    Ok(())
}

async fn lock_transfer_accounts(
    tx: &mut dyn StoreTransaction,
    from: AccountId,
    to: AccountId,
) -> Result<(Account, Account)> {
    let (first, second) = lock_order(from, to);

    let first_row = tx.get_account_by_id_for_update(&first).await?;
    let second_row = tx.get_account_by_id_for_update(&second).await?;

    let (from_row, to_row) = if first == from {
        (first_row, second_row)
    } else {
        (second_row, first_row)
    };

    let from_account = from_row.ok_or(LedgerError::SourceAccountNotFound(from))?;
    let to_account = to_row.ok_or(LedgerError::DestinationAccountNotFound(to))?;
    Ok((from_account, to_account))
}

async fn apply_transfer(
    tx: &mut dyn StoreTransaction,
    request: &TransferRequest,
) -> Result<TransferReceipt> {
    let (from, to) =
        lock_transfer_accounts(tx, request.from_account_id, request.to_account_id).await?;

    ensure_sufficient(&from, request.amount)?;

    let at = now();
    let debit = TransactionRecord::debit(from.id, request.amount, request.description.clone());
    tx.create_transaction(&debit).await?;
    tx.update_account_balance(&from.id, from.balance - request.amount, at)
        .await?;

    let credit = TransactionRecord::credit(to.id, request.amount, request.description.clone());
    tx.create_transaction(&credit).await?;
    tx.update_account_balance(&to.id, to.balance + request.amount, at)
        .await?;

    Ok(TransferReceipt { debit, credit })
}

async fn apply_reversal(
    tx: &mut dyn StoreTransaction,
    original: &TransactionRecord,
) -> Result<TransactionRecord> {
    let account = tx
        .get_account_by_id_for_update(&original.account_id)
        .await?
        .ok_or(LedgerError::AccountNotFound(original.account_id))?;

    // Checked under the row lock: every reversal of this record locks the same row.
    if tx.find_reversal_of(&original.id).await?.is_some() {
        return Err(LedgerError::AlreadyReversed(original.id));
    }

    let reversal = original.reversal();
    let new_balance = match reversal.entry_type {
        EntryType::Credit => account.balance + reversal.amount,
        EntryType::Debit => {
            ensure_sufficient(&account, reversal.amount)?;
            account.balance - reversal.amount
        }
    };

    tx.create_transaction(&reversal).await?;
    tx.update_account_balance(&account.id, new_balance, reversal.created_at)
        .await?;

    Ok(reversal)
}
