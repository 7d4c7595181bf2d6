//! Local table handlers.

use tablesync_engine::FlatRow;

use super::parse_scope;
use crate::backend::Backend;
use crate::error::Result;

pub async fn local_get_all(backend: &Backend, table: &str, user: &str) -> Result<Vec<FlatRow>> {
    let scope = parse_scope(table, user)?;
    backend.local_get_all(&scope).await
}

pub async fn local_get_one(
    backend: &Backend,
    table: &str,
    user: &str,
    id: &str,
) -> Result<FlatRow> {
    let scope = parse_scope(table, user)?;
    backend.local_get_one(&scope, id).await
}

/// Insert or overwrite a local row.
pub async fn local_insert_one(
    backend: &Backend,
    table: &str,
    user: &str,
    row: FlatRow,
) -> Result<FlatRow> {
    let scope = parse_scope(table, user)?;
    backend.local_insert_one(&scope, row).await
}

pub async fn local_delete_one(backend: &Backend, table: &str, user: &str, id: &str) -> Result<()> {
    let scope = parse_scope(table, user)?;
    backend.local_delete_one(&scope, id).await?;
    tracing::debug!(scope = %scope, row = %id, "local row deleted");
    Ok(())
}
