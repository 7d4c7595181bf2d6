//! Database operations for the sync_rows table.
//!
//! Every function takes any Postgres executor, so callers can run them on the
//! pool or inside a scope transaction. Writers must hold the scope lock
//! ([`lock_scope`]) for the whole transaction.

use sqlx::types::Json;
use sqlx::{PgExecutor, Row as _};
use tablesync_engine::{Payload, Row, Scope, Timestamp};

/// A stored sync row from the database.
#[derive(Debug)]
pub struct StoredRow {
    pub unique_id: String,
    pub payload: Payload,
    pub modified_at: i64,
    pub deleted: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let Json(payload) = row.try_get::<Json<Payload>, _>("payload")?;
        Ok(StoredRow {
            unique_id: row.try_get("unique_id")?,
            payload,
            modified_at: row.try_get("modified_at")?,
            deleted: row.try_get("deleted")?,
        })
    }
}

impl StoredRow {
    /// Convert database row to an engine Row.
    pub fn into_row(self) -> Row {
        Row {
            id: self.unique_id,
            payload: self.payload,
            modified_at: self.modified_at.max(0) as Timestamp,
            deleted: self.deleted,
        }
    }
}

fn into_rows(stored: Vec<StoredRow>) -> Vec<Row> {
    stored.into_iter().map(StoredRow::into_row).collect()
}

/// Take the scope's advisory lock for the rest of the transaction.
///
/// `exclusive` is for writers; readers that need a consistent view across
/// several statements take the shared variant.
pub async fn lock_scope<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
    exclusive: bool,
) -> Result<(), sqlx::Error> {
    let sql = if exclusive {
        "SELECT pg_advisory_xact_lock(hashtext($1))"
    } else {
        "SELECT pg_advisory_xact_lock_shared(hashtext($1))"
    };
    sqlx::query(sql)
        .bind(scope.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Largest `modified_at` in the scope, tombstones included (0 if empty).
pub async fn high_water<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
) -> Result<Timestamp, sqlx::Error> {
    let high_water: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(modified_at), 0)
        FROM sync_rows
        WHERE table_name = $1 AND user_id = $2
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .fetch_one(executor)
    .await?;

    Ok(high_water.max(0) as Timestamp)
}

/// Get a row by id, tombstone or not.
pub async fn get_row<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
    unique_id: &str,
) -> Result<Option<Row>, sqlx::Error> {
    let stored = sqlx::query_as::<_, StoredRow>(
        r#"
        SELECT unique_id, payload, modified_at, deleted
        FROM sync_rows
        WHERE table_name = $1 AND user_id = $2 AND unique_id = $3
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .bind(unique_id)
    .fetch_optional(executor)
    .await?;

    Ok(stored.map(StoredRow::into_row))
}

/// All live rows of the scope ordered by id.
pub async fn live_rows<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
) -> Result<Vec<Row>, sqlx::Error> {
    let stored = sqlx::query_as::<_, StoredRow>(
        r#"
        SELECT unique_id, payload, modified_at, deleted
        FROM sync_rows
        WHERE table_name = $1 AND user_id = $2 AND deleted = false
        ORDER BY unique_id COLLATE "C"
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .fetch_all(executor)
    .await?;

    Ok(into_rows(stored))
}

/// Ids of all live rows of the scope.
pub async fn live_ids<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT unique_id
        FROM sync_rows
        WHERE table_name = $1 AND user_id = $2 AND deleted = false
        ORDER BY unique_id COLLATE "C"
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .fetch_all(executor)
    .await
}

/// Rows modified strictly after `since`, tombstones included, in change log
/// order.
pub async fn changes_after<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
    since: Timestamp,
) -> Result<Vec<Row>, sqlx::Error> {
    let stored = sqlx::query_as::<_, StoredRow>(
        r#"
        SELECT unique_id, payload, modified_at, deleted
        FROM sync_rows
        WHERE table_name = $1 AND user_id = $2 AND modified_at > $3
        ORDER BY modified_at, unique_id COLLATE "C"
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .bind(since as i64)
    .fetch_all(executor)
    .await?;

    Ok(into_rows(stored))
}

/// Insert or overwrite a row.
pub async fn write_row<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
    row: &Row,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sync_rows (table_name, user_id, unique_id, payload, modified_at, deleted)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (table_name, user_id, unique_id) DO UPDATE SET
            payload = EXCLUDED.payload,
            modified_at = EXCLUDED.modified_at,
            deleted = EXCLUDED.deleted
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .bind(&row.id)
    .bind(Json(&row.payload))
    .bind(row.modified_at as i64)
    .bind(row.deleted)
    .execute(executor)
    .await?;

    Ok(())
}
