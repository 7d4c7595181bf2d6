//! Local Table Adapter - plain CRUD for tables that are not synced.
//!
//! Rows live in their own [`RowStore`], so a local table never shares rows
//! with a sync table of the same name. Timestamps exist underneath but are
//! never exposed, and deletes remove rows outright.

use crate::{clock::Clock, error::Result, FlatRow, RowStore, Scope};
use std::sync::Arc;

/// Non-versioned per-user tables.
#[derive(Debug)]
pub struct LocalTables {
    store: RowStore,
}

impl LocalTables {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RowStore::new(clock),
        }
    }

    /// All rows of the scope ordered by id.
    pub fn get_all(&self, scope: &Scope) -> Vec<FlatRow> {
        self.store.get_all(scope).iter().map(FlatRow::from).collect()
    }

    pub fn get_one(&self, scope: &Scope, id: &str) -> Result<FlatRow> {
        self.store.get(scope, id).map(|row| FlatRow::from(&row))
    }

    /// Insert or overwrite a row.
    pub fn insert_one(&self, scope: &Scope, row: FlatRow) -> Result<FlatRow> {
        let stored = self.store.upsert(scope, &row.id, row.fields)?;
        Ok(FlatRow::from(&stored))
    }

    /// Remove a row. Deleting a row that is not there is `RowNotFound`.
    pub fn delete_one(&self, scope: &Scope, id: &str) -> Result<()> {
        self.store.remove(scope, id).map(|_| ())
    }

    /// Rows held for the scope.
    pub fn row_count(&self, scope: &Scope) -> usize {
        self.store.read(scope, |table| table.total_len())
    }
}
