//! Persistence ports for users, the catalog, inventory and the transfer ledger.
//!
//! Reads that need no isolation go through [`MerchStore`]. Everything that
//! changes a balance runs inside a [`UnitOfWork`]: its writes become visible
//! together on [`UnitOfWork::commit`], and dropping it without committing rolls
//! every write back.

pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::models::{InventoryEntry, Item, Transfer, User};
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait MerchStore: Send + Sync {
    /// Opens a unit of work holding one transactional session.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Exact-match lookup; `None` when the name is unknown.
    async fn find_user(&self, name: &str) -> Result<Option<User>>;

    /// Fails with `DuplicateUser` when the name is already taken.
    async fn create_user(&self, name: &str, credential_hash: &str, initial_balance: i64) -> Result<User>;

    /// Fails with `UserNotFound` when the name is unknown.
    async fn get_balance(&self, name: &str) -> Result<i64>;

    async fn get_inventory(&self, name: &str) -> Result<Vec<InventoryEntry>>;

    /// Every transfer the user sent or received, oldest first.
    async fn list_transfers(&self, name: &str) -> Result<Vec<Transfer>>;

    async fn find_item(&self, name: &str) -> Result<Option<Item>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_item(&mut self, name: &str) -> Result<Option<Item>>;

    /// Debits `amount` only if the balance covers it, as one conditional write.
    async fn debit_for_purchase(&mut self, user: &str, amount: i64) -> Result<()>;

    /// Moves `amount` from `from` to `to` in one conditional write touching
    /// exactly two rows.
    async fn debit_and_credit(&mut self, from: &str, to: &str, amount: i64) -> Result<()>;

    /// Inserts the entry with quantity 1 or increments the existing one.
    async fn add_to_inventory(&mut self, user: &str, item: &str) -> Result<()>;

    /// Appends a ledger row and returns its id.
    async fn record_transfer(&mut self, from: &str, to: &str, amount: i64) -> Result<i64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
