use super::store_error;
use crate::errors::Result;
use crate::models::Transfer;
use sqlx::{Executor, Postgres};

/// Append one immutable transfer row
pub async fn record_transfer<'c, E>(executor: E, from: &str, to: &str, amount: i64) -> Result<i64>
where
    E: Executor<'c, Database = Postgres>,
{
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO transfer_history (from_user_name, to_user_name, amount)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(from)
    .bind(to)
    .bind(amount)
    .fetch_one(executor)
    .await
    .map_err(store_error)?;

    Ok(id)
}

/// Transfers where the user is either party, in insertion order
pub async fn list_by_user<'c, E>(executor: E, name: &str) -> Result<Vec<Transfer>>
where
    E: Executor<'c, Database = Postgres>,
{
    let transfers = sqlx::query_as::<_, Transfer>(
        r#"
        SELECT id, from_user_name, to_user_name, amount
        FROM transfer_history
        WHERE from_user_name = $1 OR to_user_name = $1
        ORDER BY id
        "#,
    )
    .bind(name)
    .fetch_all(executor)
    .await
    .map_err(store_error)?;

    Ok(transfers)
}
