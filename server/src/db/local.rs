//! Database operations for the local_rows table.

use sqlx::types::Json;
use sqlx::{PgExecutor, Row as _};
use tablesync_engine::{FlatRow, Payload, Scope};

/// A stored local row from the database.
#[derive(Debug)]
pub struct StoredLocalRow {
    pub unique_id: String,
    pub payload: Payload,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredLocalRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let Json(payload) = row.try_get::<Json<Payload>, _>("payload")?;
        Ok(StoredLocalRow {
            unique_id: row.try_get("unique_id")?,
            payload,
        })
    }
}

impl From<StoredLocalRow> for FlatRow {
    fn from(stored: StoredLocalRow) -> Self {
        FlatRow::new(stored.unique_id, stored.payload)
    }
}

/// All local rows of the scope ordered by id.
pub async fn get_local_rows<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
) -> Result<Vec<FlatRow>, sqlx::Error> {
    let stored = sqlx::query_as::<_, StoredLocalRow>(
        r#"
        SELECT unique_id, payload
        FROM local_rows
        WHERE table_name = $1 AND user_id = $2
        ORDER BY unique_id COLLATE "C"
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .fetch_all(executor)
    .await?;

    Ok(stored.into_iter().map(FlatRow::from).collect())
}

/// Get a local row by id.
pub async fn get_local_row<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
    unique_id: &str,
) -> Result<Option<FlatRow>, sqlx::Error> {
    let stored = sqlx::query_as::<_, StoredLocalRow>(
        r#"
        SELECT unique_id, payload
        FROM local_rows
        WHERE table_name = $1 AND user_id = $2 AND unique_id = $3
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .bind(unique_id)
    .fetch_optional(executor)
    .await?;

    Ok(stored.map(FlatRow::from))
}

/// Insert or overwrite a local row.
pub async fn upsert_local_row<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
    row: &FlatRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO local_rows (table_name, user_id, unique_id, payload)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (table_name, user_id, unique_id) DO UPDATE SET
            payload = EXCLUDED.payload
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .bind(&row.id)
    .bind(Json(&row.fields))
    .execute(executor)
    .await?;

    Ok(())
}

/// Remove a local row. Returns whether a row was removed.
pub async fn delete_local_row<'e>(
    executor: impl PgExecutor<'e>,
    scope: &Scope,
    unique_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM local_rows
        WHERE table_name = $1 AND user_id = $2 AND unique_id = $3
        "#,
    )
    .bind(&scope.table)
    .bind(&scope.user)
    .bind(unique_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}
