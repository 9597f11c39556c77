//! Conditional balance writes.
//!
//! The `coins >= amount` predicate lives inside the `UPDATE`, so PostgreSQL
//! re-checks it against the latest committed row after waiting on a row lock.
//! A follow-up existence query only runs on the failure path, to tell a missing
//! user apart from an empty wallet; users are never deleted, so that answer
//! cannot go stale.

use super::store_error;
use crate::errors::{MerchStoreError, Result};
use sqlx::PgConnection;
use tracing::warn;

pub async fn debit_for_purchase(conn: &mut PgConnection, user: &str, amount: i64) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET coins = coins - $2
        WHERE name = $1 AND coins >= $2
        "#,
    )
    .bind(user)
    .bind(amount)
    .execute(&mut *conn)
    .await
    .map_err(store_error)?;

    match result.rows_affected() {
        1 => Ok(()),
        0 => Err(debit_rejection(conn, user, amount).await?),
        n => Err(MerchStoreError::LedgerInconsistency(format!(
            "purchase debit for {} touched {} rows",
            user, n
        ))),
    }
}

/// Debit and credit in one statement: the credit CTE only fires when the
/// debit CTE returned a row.
///
/// Both rows are locked in name order before either is written, so opposing
/// transfers between the same pair queue behind each other instead of
/// deadlocking.
pub async fn debit_and_credit(conn: &mut PgConnection, from: &str, to: &str, amount: i64) -> Result<()> {
    let (debited, credited): (i64, i64) = sqlx::query_as(
        r#"
        WITH locked AS MATERIALIZED (
            SELECT name
            FROM users
            WHERE name IN ($1, $2)
            ORDER BY name
            FOR UPDATE
        ),
        debit AS (
            UPDATE users
            SET coins = coins - $3
            WHERE name = $1 AND coins >= $3 AND (SELECT COUNT(*) FROM locked) > 0
            RETURNING name
        ),
        credit AS (
            UPDATE users
            SET coins = coins + $3
            WHERE name = $2 AND EXISTS (SELECT 1 FROM debit)
            RETURNING name
        )
        SELECT
            (SELECT COUNT(*) FROM debit) AS debited,
            (SELECT COUNT(*) FROM credit) AS credited
        "#,
    )
    .bind(from)
    .bind(to)
    .bind(amount)
    .fetch_one(&mut *conn)
    .await
    .map_err(store_error)?;

    match (debited, credited) {
        (1, 1) => Ok(()),
        (0, _) => Err(debit_rejection(conn, from, amount).await?),
        (1, 0) => Err(MerchStoreError::RecipientNotFound(to.to_string())),
        (debited, credited) => {
            warn!(
                "Transfer {} -> {} touched {} debit and {} credit rows",
                from, to, debited, credited
            );
            Err(MerchStoreError::LedgerInconsistency(format!(
                "transfer touched {} rows, expected 2",
                debited + credited
            )))
        }
    }
}

/// Explains why a conditional debit matched no row.
async fn debit_rejection(conn: &mut PgConnection, user: &str, amount: i64) -> Result<MerchStoreError> {
    if user_exists(conn, user).await? {
        Ok(MerchStoreError::InsufficientFunds {
            user: user.to_string(),
            required: amount,
        })
    } else {
        Ok(MerchStoreError::UserNotFound(user.to_string()))
    }
}

async fn user_exists(conn: &mut PgConnection, name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (SELECT 1 FROM users WHERE name = $1)
        "#,
    )
    .bind(name)
    .fetch_one(conn)
    .await
    .map_err(store_error)?;

    Ok(exists)
}
