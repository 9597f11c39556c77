//! In-memory backend for development and tests.
//!
//! There is no conditional `UPDATE` here, so each user row sits behind its own
//! async mutex and a unit of work holds the row locks it touched until it
//! commits or is dropped. Transfers lock both rows in name order. Balance
//! writes are applied in place and undone on drop; inventory and ledger writes
//! are staged and published on commit.

use super::{MerchStore, UnitOfWork};
use crate::errors::{MerchStoreError, Result};
use crate::models::{InventoryEntry, Item, Transfer, User, DEFAULT_CATALOG};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[derive(Debug)]
struct UserRow {
    credential_hash: String,
    coins: i64,
}

type SharedRow = Arc<RowMutex<UserRow>>;

#[derive(Default)]
struct Inner {
    users: RwLock<HashMap<String, SharedRow>>,
    items: HashMap<String, i64>,
    inventory: Mutex<BTreeMap<(String, String), i64>>,
    transfers: Mutex<Vec<Transfer>>,
    next_transfer_id: AtomicI64,
    fail_next_transfer_record: AtomicBool,
}

impl Inner {
    fn row(&self, name: &str) -> Option<SharedRow> {
        self.users.read().get(name).cloned()
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store seeded with the default catalog.
    pub fn new() -> Self {
        Self::with_catalog(DEFAULT_CATALOG.iter().map(|(name, price)| (name.to_string(), *price)))
    }

    pub fn with_catalog(items: impl IntoIterator<Item = (String, i64)>) -> Self {
        let inner = Inner {
            items: items.into_iter().collect(),
            next_transfer_id: AtomicI64::new(1),
            ..Default::default()
        };

        MemoryStore {
            inner: Arc::new(inner),
        }
    }

    /// Makes the next `record_transfer` fail as if the store went away.
    pub fn inject_transfer_record_failure(&self) {
        self.inner.fail_next_transfer_record.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MerchStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            inner: self.inner.clone(),
            locked: BTreeMap::new(),
            inventory: Vec::new(),
            transfers: Vec::new(),
            committed: false,
        }))
    }

    async fn find_user(&self, name: &str) -> Result<Option<User>> {
        let Some(row) = self.inner.row(name) else {
            return Ok(None);
        };
        let row = row.lock().await;

        Ok(Some(User {
            name: name.to_string(),
            credential_hash: row.credential_hash.clone(),
            coins: row.coins,
        }))
    }

    async fn create_user(&self, name: &str, credential_hash: &str, initial_balance: i64) -> Result<User> {
        let mut users = self.inner.users.write();
        if users.contains_key(name) {
            return Err(MerchStoreError::DuplicateUser(name.to_string()));
        }

        users.insert(
            name.to_string(),
            Arc::new(RowMutex::new(UserRow {
                credential_hash: credential_hash.to_string(),
                coins: initial_balance,
            })),
        );
        debug!("User {} created with {} coins", name, initial_balance);

        Ok(User {
            name: name.to_string(),
            credential_hash: credential_hash.to_string(),
            coins: initial_balance,
        })
    }

    async fn get_balance(&self, name: &str) -> Result<i64> {
        let row = self
            .inner
            .row(name)
            .ok_or_else(|| MerchStoreError::UserNotFound(name.to_string()))?;
        let coins = row.lock().await.coins;
        Ok(coins)
    }

    async fn get_inventory(&self, name: &str) -> Result<Vec<InventoryEntry>> {
        let inventory = self.inner.inventory.lock();
        Ok(inventory
            .iter()
            .filter(|((user, _), _)| user == name)
            .map(|((_, item), quantity)| InventoryEntry {
                item_name: item.clone(),
                quantity: *quantity,
            })
            .collect())
    }

    async fn list_transfers(&self, name: &str) -> Result<Vec<Transfer>> {
        let transfers = self.inner.transfers.lock();
        Ok(transfers
            .iter()
            .filter(|t| t.from_user_name == name || t.to_user_name == name)
            .cloned()
            .collect())
    }

    async fn find_item(&self, name: &str) -> Result<Option<Item>> {
        Ok(lookup_item(&self.inner, name))
    }
}

fn lookup_item(inner: &Inner, name: &str) -> Option<Item> {
    inner.items.get(name).map(|price| Item {
        name: name.to_string(),
        price: *price,
    })
}

struct LockedRow {
    guard: OwnedMutexGuard<UserRow>,
    original_coins: i64,
}

pub struct MemoryUnitOfWork {
    inner: Arc<Inner>,
    locked: BTreeMap<String, LockedRow>,
    inventory: Vec<(String, String)>,
    transfers: Vec<Transfer>,
    committed: bool,
}

impl MemoryUnitOfWork {
    /// Locks the row for `name` until the unit of work ends. Returns false for
    /// unknown users.
    async fn lock_row(&mut self, name: &str) -> bool {
        if self.locked.contains_key(name) {
            return true;
        }
        let Some(row) = self.inner.row(name) else {
            return false;
        };

        let guard = row.lock_owned().await;
        let original_coins = guard.coins;
        self.locked.insert(
            name.to_string(),
            LockedRow {
                guard,
                original_coins,
            },
        );
        true
    }

    fn coins_mut(&mut self, name: &str) -> Result<&mut i64> {
        self.locked
            .get_mut(name)
            .map(|row| &mut row.guard.coins)
            .ok_or_else(|| MerchStoreError::Internal(format!("row {} is not locked", name)))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_item(&mut self, name: &str) -> Result<Option<Item>> {
        Ok(lookup_item(&self.inner, name))
    }

    async fn debit_for_purchase(&mut self, user: &str, amount: i64) -> Result<()> {
        if !self.lock_row(user).await {
            return Err(MerchStoreError::UserNotFound(user.to_string()));
        }

        let coins = self.coins_mut(user)?;
        if *coins < amount {
            return Err(MerchStoreError::InsufficientFunds {
                user: user.to_string(),
                required: amount,
            });
        }
        *coins -= amount;
        Ok(())
    }

    async fn debit_and_credit(&mut self, from: &str, to: &str, amount: i64) -> Result<()> {
        if from == to {
            return Err(MerchStoreError::SelfTransfer);
        }
        let (first, second) = if from <= to { (from, to) } else { (to, from) };
        let first_exists = self.lock_row(first).await;
        let second_exists = self.lock_row(second).await;
        let (from_exists, to_exists) = if from <= to {
            (first_exists, second_exists)
        } else {
            (second_exists, first_exists)
        };

        if !from_exists {
            return Err(MerchStoreError::UserNotFound(from.to_string()));
        }
        if *self.coins_mut(from)? < amount {
            return Err(MerchStoreError::InsufficientFunds {
                user: from.to_string(),
                required: amount,
            });
        }
        if !to_exists {
            return Err(MerchStoreError::RecipientNotFound(to.to_string()));
        }

        let credited = self
            .coins_mut(to)?
            .checked_add(amount)
            .ok_or_else(|| MerchStoreError::LedgerInconsistency(format!("balance of {} overflows", to)))?;
        *self.coins_mut(from)? -= amount;
        *self.coins_mut(to)? = credited;
        Ok(())
    }

    async fn add_to_inventory(&mut self, user: &str, item: &str) -> Result<()> {
        if !self.inner.items.contains_key(item) {
            return Err(MerchStoreError::ItemNotFound(item.to_string()));
        }
        self.inventory.push((user.to_string(), item.to_string()));
        Ok(())
    }

    async fn record_transfer(&mut self, from: &str, to: &str, amount: i64) -> Result<i64> {
        if self.inner.fail_next_transfer_record.swap(false, Ordering::SeqCst) {
            warn!("Injected failure while recording transfer {} -> {}", from, to);
            return Err(MerchStoreError::StoreUnavailable(
                "injected transfer record failure".to_string(),
            ));
        }

        let id = self.inner.next_transfer_id.fetch_add(1, Ordering::SeqCst);
        self.transfers.push(Transfer {
            id,
            from_user_name: from.to_string(),
            to_user_name: to.to_string(),
            amount,
        });
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut uow = self;

        // Publish staged rows while the row locks are still held.
        {
            let mut inventory = uow.inner.inventory.lock();
            for (user, item) in uow.inventory.drain(..) {
                *inventory.entry((user, item)).or_insert(0) += 1;
            }
        }
        {
            let mut transfers = uow.inner.transfers.lock();
            transfers.append(&mut uow.transfers);
            transfers.sort_by_key(|t| t.id);
        }

        uow.committed = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for row in self.locked.values_mut() {
            row.guard.coins = row.original_coins;
        }
    }
}
