//! Sync table handlers.

use serde::Serialize;
use tablesync_engine::{FlatRow, Mutation, Row, SyncResult, WriteOutcome};

use super::{parse_millis, parse_scope};
use crate::backend::Backend;
use crate::error::Result;

/// Response for timestamp-gated writes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    /// Whether the write went through or was dropped as stale
    pub applied: bool,
    /// The row as stored after the call
    pub row: Row,
}

impl From<WriteOutcome> for WriteResponse {
    fn from(outcome: WriteOutcome) -> Self {
        Self {
            applied: outcome.is_applied(),
            row: outcome.into_row(),
        }
    }
}

/// Live rows of a scope.
pub async fn get_all(backend: &Backend, table: &str, user: &str) -> Result<Vec<Row>> {
    let scope = parse_scope(table, user)?;
    backend.get_all(&scope).await
}

/// One live row.
pub async fn get_one(backend: &Backend, table: &str, user: &str, id: &str) -> Result<Row> {
    let scope = parse_scope(table, user)?;
    backend.get_one(&scope, id).await
}

/// Live rows together with the scope's high-water mark.
pub async fn get_raw(backend: &Backend, table: &str, user: &str) -> Result<SyncResult> {
    let scope = parse_scope(table, user)?;
    backend.raw(&scope).await
}

/// Rows changed strictly after `millis`, tombstones included.
pub async fn get_changes_after(
    backend: &Backend,
    table: &str,
    user: &str,
    millis: &str,
) -> Result<SyncResult> {
    let scope = parse_scope(table, user)?;
    let since = parse_millis(millis)?;
    backend.changes_after(&scope, since).await
}

/// Unconditional single-row upsert.
pub async fn insert_one(backend: &Backend, table: &str, user: &str, row: FlatRow) -> Result<Row> {
    let scope = parse_scope(table, user)?;
    let stored = backend.insert_one(&scope, &row.id, row.fields).await?;
    tracing::debug!(
        scope = %scope,
        row = %stored.id,
        modified_at = stored.modified_at,
        "row written"
    );
    Ok(stored)
}

/// Unconditional single-row delete.
pub async fn delete_one(backend: &Backend, table: &str, user: &str, id: &str) -> Result<Row> {
    let scope = parse_scope(table, user)?;
    let tombstone = backend.delete_one(&scope, id).await?;
    tracing::debug!(scope = %scope, row = %id, modified_at = tombstone.modified_at, "row deleted");
    Ok(tombstone)
}

/// Reconcile a client batch against the client's baseline `millis`.
pub async fn sync_at(
    backend: &Backend,
    table: &str,
    user: &str,
    millis: &str,
    batch: Vec<Mutation>,
) -> Result<SyncResult> {
    let scope = parse_scope(table, user)?;
    let base = parse_millis(millis)?;
    let pushed = batch.len();

    let result = backend.sync_at(&scope, base, batch).await?;

    tracing::info!(
        scope = %scope,
        base,
        pushed,
        changes = result.changes.len(),
        conflicts = result.conflicts.len(),
        new_timestamp = result.new_timestamp,
        "sync completed"
    );
    Ok(result)
}

/// Upsert unless the stored row is newer than the claimed edit time.
pub async fn insert_if_recent(
    backend: &Backend,
    table: &str,
    user: &str,
    millis: &str,
    row: FlatRow,
) -> Result<WriteResponse> {
    let scope = parse_scope(table, user)?;
    let millis = parse_millis(millis)?;
    let outcome = backend
        .insert_if_recent(&scope, &row.id, row.fields, millis)
        .await?;
    Ok(outcome.into())
}

/// Delete unless the stored row is newer than the claimed edit time.
pub async fn delete_if_recent(
    backend: &Backend,
    table: &str,
    user: &str,
    id: &str,
    millis: &str,
) -> Result<WriteResponse> {
    let scope = parse_scope(table, user)?;
    let millis = parse_millis(millis)?;
    let outcome = backend.delete_if_recent(&scope, id, millis).await?;
    Ok(outcome.into())
}

/// Make the scope's live rows exactly `rows`.
pub async fn replace_all(
    backend: &Backend,
    table: &str,
    user: &str,
    rows: Vec<FlatRow>,
) -> Result<SyncResult> {
    let scope = parse_scope(table, user)?;
    let result = backend.replace_all(&scope, rows).await?;
    tracing::info!(scope = %scope, written = result.changes.len(), "table replaced");
    Ok(result)
}

/// Apply a batch without conflict checks.
pub async fn handle_changes(
    backend: &Backend,
    table: &str,
    user: &str,
    batch: Vec<Mutation>,
) -> Result<SyncResult> {
    let scope = parse_scope(table, user)?;
    let result = backend.handle_changes(&scope, batch).await?;
    tracing::info!(scope = %scope, written = result.changes.len(), "changes applied");
    Ok(result)
}
