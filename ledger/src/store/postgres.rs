//! PostgreSQL ledger store.

use async_trait::async_trait;
use ledgerline_common::{now, AccountId, LedgerError, Result, Timestamp, TransactionId};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{error, info};
use uuid::Uuid;

use super::{LedgerStore, Page, StoreTransaction};
use crate::account::Account;
use crate::journal::{EntryType, TransactionRecord};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS accounts (
        id UUID PRIMARY KEY,
        owner_name VARCHAR(100) NOT NULL,
        balance NUMERIC(15,2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        deleted_at TIMESTAMPTZ
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_accounts_deleted_at ON accounts (deleted_at)",
    r#"CREATE TABLE IF NOT EXISTS transactions (
        seq BIGSERIAL UNIQUE,
        id UUID PRIMARY KEY,
        account_id UUID NOT NULL REFERENCES accounts (id),
        type VARCHAR(20) NOT NULL,
        amount NUMERIC(15,2) NOT NULL CHECK (amount > 0),
        description VARCHAR(255) NOT NULL DEFAULT '',
        reversal_of UUID REFERENCES transactions (id),
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_account_id ON transactions (account_id, created_at DESC)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_reversal_of ON transactions (reversal_of) WHERE reversal_of IS NOT NULL",
];

const ACCOUNT_COLUMNS: &str = "id, owner_name, balance, created_at, updated_at, deleted_at";
const TRANSACTION_COLUMNS: &str = "id, account_id, type, amount, description, reversal_of, created_at";

fn storage_err(err: sqlx::Error) -> LedgerError {
    error!(error = %err, "Database error");
    LedgerError::storage(err)
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    Ok(Account {
        id: AccountId::from_uuid(row.try_get("id").map_err(storage_err)?),
        owner_name: row.try_get("owner_name").map_err(storage_err)?,
        balance: row.try_get("balance").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
        deleted_at: row.try_get("deleted_at").map_err(storage_err)?,
    })
}

fn record_from_row(row: &PgRow) -> Result<TransactionRecord> {
    let entry_type: String = row.try_get("type").map_err(storage_err)?;
    let reversal_of: Option<Uuid> = row.try_get("reversal_of").map_err(storage_err)?;

    Ok(TransactionRecord {
        id: TransactionId::from_uuid(row.try_get("id").map_err(storage_err)?),
        account_id: AccountId::from_uuid(row.try_get("account_id").map_err(storage_err)?),
        entry_type: EntryType::parse(&entry_type).ok_or_else(|| {
            LedgerError::storage(format!("unknown transaction type {entry_type:?}"))
        })?,
        amount: row.try_get("amount").map_err(storage_err)?,
        description: row.try_get("description").map_err(storage_err)?,
        reversal_of: reversal_of.map(TransactionId::from_uuid),
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

/// Ledger store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a new pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage_err)?;

        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.map_err(storage_err)?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn get_account_by_id(&self, id: &AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn get_transaction_by_id(&self, id: &TransactionId) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_transactions_by_account_id(
        &self,
        id: &AccountId,
        page: Page,
    ) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = $1 \
             ORDER BY created_at DESC, seq DESC LIMIT $2 OFFSET $3"
        ))
        .bind(*id.as_uuid())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn get_all_transactions(&self, page: Page) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             ORDER BY created_at DESC, seq DESC LIMIT $1 OFFSET $2"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn soft_delete_account(&self, id: &AccountId) -> Result<bool> {
        let at = now();
        let result = sqlx::query(
            "UPDATE accounts SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(*id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() == 1)
    }
}

/// Unit of work over a PostgreSQL transaction.
struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn create_account(&mut self, account: &Account) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (id, owner_name, balance, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(*account.id.as_uuid())
        .bind(&account.owner_name)
        .bind(account.balance)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_account_by_id_for_update(&mut self, id: &AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn update_account_balance(
        &mut self,
        id: &AccountId,
        balance: Decimal,
        at: Timestamp,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE accounts SET balance = $2, updated_at = $3 WHERE id = $1")
            .bind(*id.as_uuid())
            .bind(balance)
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_err)?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::storage(format!("account {id} was not updated")));
        }
        Ok(())
    }

    async fn create_transaction(&mut self, record: &TransactionRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(*record.id.as_uuid())
        .bind(*record.account_id.as_uuid())
        .bind(record.entry_type.as_str())
        .bind(record.amount)
        .bind(&record.description)
        .bind(record.reversal_of.map(|id| *id.as_uuid()))
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn find_reversal_of(&mut self, id: &TransactionId) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reversal_of = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(storage_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(storage_err)
    }
}
