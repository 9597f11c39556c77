use crate::auth::CredentialVerifier;
use crate::errors::{MerchStoreError, Result};
use crate::metrics::Metrics;
use crate::models::{User, UserInfo};
use crate::store::{MerchStore, UnitOfWork};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Caller identity established by the JWT middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn name(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub starting_balance: i64,
    pub unit_of_work_timeout: Duration,
}

/// Runs purchases and transfers as single units of work and assembles the
/// info view.
pub struct MerchService {
    store: Arc<dyn MerchStore>,
    verifier: Arc<dyn CredentialVerifier>,
    metrics: Arc<Metrics>,
    settings: ServiceSettings,
}

impl MerchService {
    pub fn new(
        store: Arc<dyn MerchStore>,
        verifier: Arc<dyn CredentialVerifier>,
        metrics: Arc<Metrics>,
        settings: ServiceSettings,
    ) -> Self {
        MerchService {
            store,
            verifier,
            metrics,
            settings,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Logs in an existing user or registers a new one with the starting balance.
    pub async fn authenticate_or_register(&self, name: &str, password: &str) -> Result<User> {
        let result = self.authenticate_inner(name, password).await;
        if let Err(e) = &result {
            self.record_failure("auth", e);
        }
        result
    }

    async fn authenticate_inner(&self, name: &str, password: &str) -> Result<User> {
        if let Some(user) = self.store.find_user(name).await? {
            return self.check_password(user, password).await;
        }

        let hash = self.hash_password(password).await?;
        match self
            .store
            .create_user(name, &hash, self.settings.starting_balance)
            .await
        {
            Ok(user) => {
                self.metrics.users_registered_total.inc();
                info!("Registered new user {}", name);
                Ok(user)
            }
            Err(MerchStoreError::DuplicateUser(_)) => {
                // Lost a concurrent first login; the winner's password decides.
                let user = self
                    .store
                    .find_user(name)
                    .await?
                    .ok_or_else(|| MerchStoreError::UserNotFound(name.to_string()))?;
                self.check_password(user, password).await
            }
            Err(e) => Err(e),
        }
    }

    async fn check_password(&self, user: User, password: &str) -> Result<User> {
        let verifier = self.verifier.clone();
        let hash = user.credential_hash.clone();
        let password = password.to_string();

        let valid = tokio::task::spawn_blocking(move || verifier.verify(&hash, &password))
            .await
            .map_err(|e| MerchStoreError::Internal(format!("credential check panicked: {}", e)))??;

        if valid {
            Ok(user)
        } else {
            warn!("Invalid password for user {}", user.name);
            Err(MerchStoreError::InvalidCredentials)
        }
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        let verifier = self.verifier.clone();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || verifier.hash(&password))
            .await
            .map_err(|e| MerchStoreError::Internal(format!("credential hashing panicked: {}", e)))?
    }

    /// Buys one unit of `item_name` for `user`.
    pub async fn purchase(&self, user: &AuthenticatedUser, item_name: &str) -> Result<()> {
        let result = self
            .within_unit_of_work(|mut uow| async move {
                let item = uow
                    .find_item(item_name)
                    .await?
                    .ok_or_else(|| MerchStoreError::ItemNotFound(item_name.to_string()))?;

                uow.debit_for_purchase(user.name(), item.price).await?;
                uow.add_to_inventory(user.name(), &item.name).await?;

                Ok::<_, MerchStoreError>((uow, item.price))
            })
            .await;

        match result {
            Ok(price) => {
                self.metrics.purchases_total.inc();
                self.metrics.coins_spent_total.inc_by(price as u64);
                info!("User {} bought {} for {} coins", user.name(), item_name, price);
                Ok(())
            }
            Err(e) => {
                self.record_failure("purchase", &e);
                Err(e)
            }
        }
    }

    /// Moves `amount` coins from `from` to `to` and records the transfer.
    pub async fn transfer(&self, from: &AuthenticatedUser, to: &str, amount: i64) -> Result<i64> {
        let result = self.transfer_inner(from.name(), to, amount).await;

        match &result {
            Ok(id) => {
                self.metrics.transfers_total.inc();
                self.metrics.coins_transferred_total.inc_by(amount as u64);
                info!(
                    "Transferred {} coins from {} to {} (transfer {})",
                    amount,
                    from.name(),
                    to,
                    id
                );
            }
            Err(e) => self.record_failure("transfer", e),
        }
        result
    }

    async fn transfer_inner(&self, from: &str, to: &str, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(MerchStoreError::InvalidAmount(amount));
        }
        if from == to {
            return Err(MerchStoreError::SelfTransfer);
        }

        self.within_unit_of_work(|mut uow| async move {
            uow.debit_and_credit(from, to, amount).await?;
            let id = uow.record_transfer(from, to, amount).await?;
            Ok::<_, MerchStoreError>((uow, id))
        })
        .await
    }

    /// Balance, inventory and transfer history for `user`.
    pub async fn get_info(&self, user: &AuthenticatedUser) -> Result<UserInfo> {
        let name = user.name();
        let balance = self.store.get_balance(name).await?;
        let inventory = self.store.get_inventory(name).await?;
        let history = self.store.list_transfers(name).await?;

        Ok(UserInfo::new(name, balance, inventory, history))
    }

    /// Runs `work` against a fresh unit of work and commits what it hands back.
    ///
    /// The deadline covers begin through the last staged write. On error or
    /// timeout the unit of work is dropped, which rolls it back. Commit runs
    /// outside the deadline: once COMMIT is sent its outcome must be reported
    /// as it is, never as a retryable timeout.
    async fn within_unit_of_work<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Box<dyn UnitOfWork>) -> Fut,
        Fut: Future<Output = Result<(Box<dyn UnitOfWork>, T)>>,
    {
        let started = Instant::now();
        let timeout = self.settings.unit_of_work_timeout;

        let staged = tokio::time::timeout(timeout, async {
            match self.store.begin().await {
                Ok(uow) => work(uow).await,
                Err(e) => Err(e),
            }
        })
        .await
        .unwrap_or_else(|_| Err(MerchStoreError::Timeout(timeout.as_millis() as u64)));

        let result = match staged {
            Ok((uow, value)) => uow.commit().await.map(|()| value),
            Err(e) => Err(e),
        };

        self.metrics
            .unit_of_work_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        result
    }

    fn record_failure(&self, operation: &str, err: &MerchStoreError) {
        self.metrics.track_rejection(operation, err.error_type());
        if err.is_client_error() {
            warn!("{} rejected: {}", operation, err);
        } else {
            error!("{} failed: {}", operation, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockCredentialVerifier;
    use crate::models::{InventoryEntry, Item, Transfer, DEFAULT_STARTING_BALANCE};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn settings() -> ServiceSettings {
        ServiceSettings {
            starting_balance: DEFAULT_STARTING_BALANCE,
            unit_of_work_timeout: Duration::from_secs(5),
        }
    }

    fn plain_verifier() -> MockCredentialVerifier {
        let mut verifier = MockCredentialVerifier::new();
        verifier
            .expect_hash()
            .returning(|password| Ok(format!("hashed:{}", password)));
        verifier
            .expect_verify()
            .returning(|hash, password| Ok(hash == format!("hashed:{}", password)));
        verifier
    }

    fn service(store: &MemoryStore) -> MerchService {
        MerchService::new(
            Arc::new(store.clone()),
            Arc::new(plain_verifier()),
            Arc::new(Metrics::new().unwrap()),
            settings(),
        )
    }

    fn user(name: &str) -> AuthenticatedUser {
        AuthenticatedUser(name.to_string())
    }

    async fn seeded(names: &[&str]) -> (MemoryStore, MerchService) {
        let store = MemoryStore::new();
        let service = service(&store);
        for name in names {
            service.authenticate_or_register(name, "pw").await.unwrap();
        }
        (store, service)
    }

    #[tokio::test]
    async fn test_first_login_registers_with_starting_balance() {
        let (store, service) = seeded(&[]).await;

        let user = service.authenticate_or_register("alice", "pw").await.unwrap();
        assert_eq!(user.coins, 1000);
        assert_eq!(user.credential_hash, "hashed:pw");
        assert_eq!(store.get_balance("alice").await.unwrap(), 1000);
        assert_eq!(service.metrics().users_registered_total.get(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let (_store, service) = seeded(&["alice"]).await;

        let result = service.authenticate_or_register("alice", "nope").await;
        assert!(matches!(result, Err(MerchStoreError::InvalidCredentials)));
        assert!(service.authenticate_or_register("alice", "pw").await.is_ok());
    }

    #[tokio::test]
    async fn test_login_does_not_rehash_existing_user() {
        let store = MemoryStore::new();
        store.create_user("alice", "hashed:pw", 1000).await.unwrap();

        let mut verifier = MockCredentialVerifier::new();
        verifier.expect_hash().never();
        verifier.expect_verify().times(1).returning(|_, _| Ok(true));

        let service = MerchService::new(
            Arc::new(store),
            Arc::new(verifier),
            Arc::new(Metrics::new().unwrap()),
            settings(),
        );
        assert!(service.authenticate_or_register("alice", "pw").await.is_ok());
    }

    #[tokio::test]
    async fn test_purchase_debits_and_records_inventory() {
        let (store, service) = seeded(&["alice"]).await;

        service.purchase(&user("alice"), "t-shirt").await.unwrap();

        let info = service.get_info(&user("alice")).await.unwrap();
        assert_eq!(info.balance, 920);
        assert_eq!(
            info.inventory,
            vec![InventoryEntry {
                item_name: "t-shirt".to_string(),
                quantity: 1
            }]
        );
        assert_eq!(store.get_balance("alice").await.unwrap(), 920);
    }

    #[tokio::test]
    async fn test_repeat_purchase_increments_quantity() {
        let (store, service) = seeded(&["alice"]).await;

        service.purchase(&user("alice"), "cup").await.unwrap();
        service.purchase(&user("alice"), "cup").await.unwrap();

        let inventory = store.get_inventory("alice").await.unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].quantity, 2);
        assert_eq!(store.get_balance("alice").await.unwrap(), 960);
    }

    #[tokio::test]
    async fn test_unknown_item_changes_nothing() {
        let (store, service) = seeded(&["alice"]).await;

        let result = service.purchase(&user("alice"), "yacht").await;
        assert!(matches!(result, Err(MerchStoreError::ItemNotFound(item)) if item == "yacht"));
        assert_eq!(store.get_balance("alice").await.unwrap(), 1000);
        assert!(store.get_inventory("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purchase_beyond_balance_is_rejected() {
        let (store, service) = seeded(&["alice"]).await;
        service.purchase(&user("alice"), "pink-hoody").await.unwrap();
        service.purchase(&user("alice"), "pink-hoody").await.unwrap();

        let result = service.purchase(&user("alice"), "pen").await;
        assert!(matches!(result, Err(MerchStoreError::InsufficientFunds { .. })));
        assert_eq!(store.get_balance("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purchase_for_unknown_user() {
        let (_store, service) = seeded(&[]).await;
        let result = service.purchase(&user("ghost"), "pen").await;
        assert!(matches!(result, Err(MerchStoreError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_transfer_moves_coins_and_records_history() {
        let (_store, service) = seeded(&["alice", "bob"]).await;
        service.purchase(&user("alice"), "t-shirt").await.unwrap();

        service.transfer(&user("alice"), "bob", 100).await.unwrap();

        let alice = service.get_info(&user("alice")).await.unwrap();
        let bob = service.get_info(&user("bob")).await.unwrap();
        assert_eq!(alice.balance, 820);
        assert_eq!(bob.balance, 1100);
        assert_eq!(alice.sent.len(), 1);
        assert!(alice.received.is_empty());
        assert_eq!(bob.received.len(), 1);
        assert_eq!(bob.received[0].from_user_name, "alice");
        assert_eq!(bob.received[0].amount, 100);
        assert_eq!(alice.sent[0].id, bob.received[0].id);
    }

    #[tokio::test]
    async fn test_transfer_beyond_balance_changes_nothing() {
        let (store, service) = seeded(&["alice", "bob"]).await;

        let result = service.transfer(&user("alice"), "bob", 10_000).await;
        assert!(matches!(result, Err(MerchStoreError::InsufficientFunds { .. })));
        assert_eq!(store.get_balance("alice").await.unwrap(), 1000);
        assert_eq!(store.get_balance("bob").await.unwrap(), 1000);
        assert!(store.list_transfers("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_input_validation() {
        let (_store, service) = seeded(&["alice", "bob"]).await;

        assert!(matches!(
            service.transfer(&user("alice"), "bob", 0).await,
            Err(MerchStoreError::InvalidAmount(0))
        ));
        assert!(matches!(
            service.transfer(&user("alice"), "bob", -5).await,
            Err(MerchStoreError::InvalidAmount(-5))
        ));
        assert!(matches!(
            service.transfer(&user("alice"), "alice", 5).await,
            Err(MerchStoreError::SelfTransfer)
        ));
        assert!(matches!(
            service.transfer(&user("alice"), "nobody", 5).await,
            Err(MerchStoreError::RecipientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_ledger_write_rolls_back_balances() {
        let (store, service) = seeded(&["alice", "bob"]).await;
        store.inject_transfer_record_failure();

        let result = service.transfer(&user("alice"), "bob", 100).await;
        assert!(matches!(result, Err(MerchStoreError::StoreUnavailable(_))));
        assert_eq!(store.get_balance("alice").await.unwrap(), 1000);
        assert_eq!(store.get_balance("bob").await.unwrap(), 1000);
        assert!(store.list_transfers("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_info_for_new_user_is_empty() {
        let (_store, service) = seeded(&["alice"]).await;

        let info = service.get_info(&user("alice")).await.unwrap();
        assert_eq!(info.balance, 1000);
        assert!(info.inventory.is_empty());
        assert!(info.sent.is_empty());
        assert!(info.received.is_empty());
    }

    #[tokio::test]
    async fn test_rejections_are_counted() {
        let (_store, service) = seeded(&["alice", "bob"]).await;
        let _ = service.transfer(&user("alice"), "bob", 10_000).await;

        let count = service
            .metrics()
            .rejections_total
            .with_label_values(&["transfer", "insufficient_funds"])
            .get();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_unit_of_work_deadline() {
        let store = MemoryStore::new();
        store.create_user("alice", "hashed:pw", 1000).await.unwrap();
        store.create_user("bob", "hashed:pw", 1000).await.unwrap();

        let service = MerchService::new(
            Arc::new(store.clone()),
            Arc::new(plain_verifier()),
            Arc::new(Metrics::new().unwrap()),
            ServiceSettings {
                starting_balance: 1000,
                unit_of_work_timeout: Duration::from_millis(50),
            },
        );

        // Hold alice's row so the transfer cannot finish in time.
        let mut blocker = store.begin().await.unwrap();
        blocker.debit_for_purchase("alice", 1).await.unwrap();

        let result = service.transfer(&user("alice"), "bob", 10).await;
        assert!(matches!(result, Err(MerchStoreError::Timeout(50))));

        blocker.rollback().await.unwrap();
        assert_eq!(store.get_balance("alice").await.unwrap(), 1000);
        assert_eq!(store.get_balance("bob").await.unwrap(), 1000);
    }

    /// Memory store whose commit acknowledgement arrives late.
    struct SlowCommitStore {
        inner: MemoryStore,
        delay: Duration,
    }

    struct SlowCommitUnitOfWork {
        inner: Box<dyn UnitOfWork>,
        delay: Duration,
    }

    #[async_trait]
    impl MerchStore for SlowCommitStore {
        async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
            Ok(Box::new(SlowCommitUnitOfWork {
                inner: self.inner.begin().await?,
                delay: self.delay,
            }))
        }

        async fn find_user(&self, name: &str) -> Result<Option<User>> {
            self.inner.find_user(name).await
        }

        async fn create_user(&self, name: &str, credential_hash: &str, initial_balance: i64) -> Result<User> {
            self.inner.create_user(name, credential_hash, initial_balance).await
        }

        async fn get_balance(&self, name: &str) -> Result<i64> {
            self.inner.get_balance(name).await
        }

        async fn get_inventory(&self, name: &str) -> Result<Vec<InventoryEntry>> {
            self.inner.get_inventory(name).await
        }

        async fn list_transfers(&self, name: &str) -> Result<Vec<Transfer>> {
            self.inner.list_transfers(name).await
        }

        async fn find_item(&self, name: &str) -> Result<Option<Item>> {
            self.inner.find_item(name).await
        }
    }

    #[async_trait]
    impl UnitOfWork for SlowCommitUnitOfWork {
        async fn find_item(&mut self, name: &str) -> Result<Option<Item>> {
            self.inner.find_item(name).await
        }

        async fn debit_for_purchase(&mut self, user: &str, amount: i64) -> Result<()> {
            self.inner.debit_for_purchase(user, amount).await
        }

        async fn debit_and_credit(&mut self, from: &str, to: &str, amount: i64) -> Result<()> {
            self.inner.debit_and_credit(from, to, amount).await
        }

        async fn add_to_inventory(&mut self, user: &str, item: &str) -> Result<()> {
            self.inner.add_to_inventory(user, item).await
        }

        async fn record_transfer(&mut self, from: &str, to: &str, amount: i64) -> Result<i64> {
            self.inner.record_transfer(from, to, amount).await
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            let delay = self.delay;
            self.inner.commit().await?;
            tokio::time::sleep(delay).await;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_slow_commit_is_reported_as_success() {
        let store = MemoryStore::new();
        store.create_user("alice", "hashed:pw", 1000).await.unwrap();
        store.create_user("bob", "hashed:pw", 1000).await.unwrap();

        let service = MerchService::new(
            Arc::new(SlowCommitStore {
                inner: store.clone(),
                delay: Duration::from_millis(200),
            }),
            Arc::new(plain_verifier()),
            Arc::new(Metrics::new().unwrap()),
            ServiceSettings {
                starting_balance: 1000,
                unit_of_work_timeout: Duration::from_millis(50),
            },
        );

        service.transfer(&user("alice"), "bob", 100).await.unwrap();
        service.purchase(&user("alice"), "cup").await.unwrap();

        assert_eq!(store.get_balance("alice").await.unwrap(), 880);
        assert_eq!(store.get_balance("bob").await.unwrap(), 1100);
        assert_eq!(store.list_transfers("alice").await.unwrap().len(), 1);
        assert_eq!(service.metrics().transfers_total.get(), 1);
        assert_eq!(
            service
                .metrics()
                .rejections_total
                .with_label_values(&["transfer", "timeout"])
                .get(),
            0
        );
    }
}
