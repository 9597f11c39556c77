//! PostgreSQL backend.
//!
//! Every balance change is a single conditional `UPDATE` evaluated by the
//! database, so the check and the write cannot be separated by a concurrent
//! transaction. Row locks taken by those statements serialise overlapping
//! purchases and transfers.

pub mod balance;
pub mod catalog;
pub mod identity;
pub mod ledger;

use super::{MerchStore, UnitOfWork};
use crate::errors::{MerchStoreError, Result};
use crate::models::{InventoryEntry, Item, Transfer, User};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{error, info};

const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(store_error)?;

        info!("Connected to PostgreSQL (max {} connections)", max_connections);

        Ok(PgStore { pool })
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MerchStoreError::StoreUnavailable(format!("migration failed: {}", e)))?;

        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl MerchStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(store_error)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn find_user(&self, name: &str) -> Result<Option<User>> {
        identity::find_user(&self.pool, name).await
    }

    async fn create_user(&self, name: &str, credential_hash: &str, initial_balance: i64) -> Result<User> {
        identity::create_user(&self.pool, name, credential_hash, initial_balance).await
    }

    async fn get_balance(&self, name: &str) -> Result<i64> {
        identity::get_balance(&self.pool, name).await
    }

    async fn get_inventory(&self, name: &str) -> Result<Vec<InventoryEntry>> {
        identity::get_inventory(&self.pool, name).await
    }

    async fn list_transfers(&self, name: &str) -> Result<Vec<Transfer>> {
        ledger::list_by_user(&self.pool, name).await
    }

    async fn find_item(&self, name: &str) -> Result<Option<Item>> {
        catalog::find_item(&self.pool, name).await
    }
}

/// Wraps one PostgreSQL transaction. sqlx rolls the transaction back when it is
/// dropped uncommitted, which covers errors, timeouts and cancelled requests.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_item(&mut self, name: &str) -> Result<Option<Item>> {
        catalog::find_item(&mut *self.tx, name).await
    }

    async fn debit_for_purchase(&mut self, user: &str, amount: i64) -> Result<()> {
        balance::debit_for_purchase(&mut *self.tx, user, amount).await
    }

    async fn debit_and_credit(&mut self, from: &str, to: &str, amount: i64) -> Result<()> {
        balance::debit_and_credit(&mut *self.tx, from, to, amount).await
    }

    async fn add_to_inventory(&mut self, user: &str, item: &str) -> Result<()> {
        catalog::add_to_inventory(&mut *self.tx, user, item).await
    }

    async fn record_transfer(&mut self, from: &str, to: &str, amount: i64) -> Result<i64> {
        ledger::record_transfer(&mut *self.tx, from, to, amount).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            store_error(e)
        })
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(store_error)
    }
}

/// Separates retryable infrastructure failures from everything else.
pub(crate) fn store_error(err: sqlx::Error) -> MerchStoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            MerchStoreError::StoreUnavailable(err.to_string())
        }
        sqlx::Error::Database(db_err)
            if matches!(
                db_err.code().as_deref(),
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
            ) =>
        {
            MerchStoreError::StoreUnavailable(db_err.message().to_string())
        }
        _ => MerchStoreError::Database(err),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}
