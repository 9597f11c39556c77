use super::store_error;
use crate::errors::Result;
use crate::models::Item;
use sqlx::{Executor, Postgres};

/// Get catalog item by name
pub async fn find_item<'c, E>(executor: E, name: &str) -> Result<Option<Item>>
where
    E: Executor<'c, Database = Postgres>,
{
    let item = sqlx::query_as::<_, Item>(
        r#"
        SELECT name, price FROM merch_items WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(executor)
    .await
    .map_err(store_error)?;

    Ok(item)
}

/// Upsert on the (user_name, item_name) key: first purchase inserts 1,
/// repeats increment.
pub async fn add_to_inventory<'c, E>(executor: E, user: &str, item: &str) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO inventory (user_name, item_name, quantity)
        VALUES ($1, $2, 1)
        ON CONFLICT (user_name, item_name)
        DO UPDATE SET quantity = inventory.quantity + 1
        "#,
    )
    .bind(user)
    .bind(item)
    .execute(executor)
    .await
    .map_err(store_error)?;

    Ok(())
}
