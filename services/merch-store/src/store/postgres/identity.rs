use super::{is_unique_violation, store_error};
use crate::errors::{MerchStoreError, Result};
use crate::models::{InventoryEntry, User};
use sqlx::{Executor, Postgres};
use tracing::{error, info};

/// Get user by name
pub async fn find_user<'c, E>(executor: E, name: &str) -> Result<Option<User>>
where
    E: Executor<'c, Database = Postgres>,
{
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT name, credential_hash, coins FROM users WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(executor)
    .await
    .map_err(store_error)?;

    Ok(user)
}

/// Create a user; the primary key on `name` rejects concurrent duplicates
pub async fn create_user<'c, E>(
    executor: E,
    name: &str,
    credential_hash: &str,
    initial_balance: i64,
) -> Result<User>
where
    E: Executor<'c, Database = Postgres>,
{
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, credential_hash, coins)
        VALUES ($1, $2, $3)
        RETURNING name, credential_hash, coins
        "#,
    )
    .bind(name)
    .bind(credential_hash)
    .bind(initial_balance)
    .fetch_one(executor)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            MerchStoreError::DuplicateUser(name.to_string())
        } else {
            error!("Failed to create user {}: {}", name, e);
            store_error(e)
        }
    })?;

    info!("User {} created with {} coins", user.name, user.coins);

    Ok(user)
}

pub async fn get_balance<'c, E>(executor: E, name: &str) -> Result<i64>
where
    E: Executor<'c, Database = Postgres>,
{
    let coins: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT coins FROM users WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(executor)
    .await
    .map_err(store_error)?;

    coins.ok_or_else(|| MerchStoreError::UserNotFound(name.to_string()))
}

pub async fn get_inventory<'c, E>(executor: E, name: &str) -> Result<Vec<InventoryEntry>>
where
    E: Executor<'c, Database = Postgres>,
{
    let entries = sqlx::query_as::<_, InventoryEntry>(
        r#"
        SELECT item_name, quantity
        FROM inventory
        WHERE user_name = $1
        ORDER BY item_name
        "#,
    )
    .bind(name)
    .fetch_all(executor)
    .await
    .map_err(store_error)?;

    Ok(entries)
}
