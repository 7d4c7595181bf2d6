//! Change Log - the "what changed after T" query surface.
//!
//! There is no separate log structure: the Row Store's `(modified_at, id)`
//! index already orders every row by its last change, and tombstones stay in
//! place so deletions remain visible to replicas that sync later.

use crate::{Row, RowStore, Scope, Timestamp};

/// Read-only view over a [`RowStore`].
#[derive(Debug, Clone, Copy)]
pub struct ChangeLog<'a> {
    store: &'a RowStore,
}

impl<'a> ChangeLog<'a> {
    pub fn new(store: &'a RowStore) -> Self {
        Self { store }
    }

    /// Rows changed strictly after `timestamp`, tombstones included, ordered
    /// by `modified_at` then id.
    pub fn changes_after(&self, scope: &Scope, timestamp: Timestamp) -> Vec<Row> {
        self.store
            .read(scope, |table| table.rows_after(timestamp).cloned().collect())
    }

    /// All live rows ordered by id, for a full initial sync.
    pub fn raw_snapshot(&self, scope: &Scope) -> Vec<Row> {
        self.store
            .read(scope, |table| table.live_rows().cloned().collect())
    }

    /// Live rows together with the high-water mark they are consistent with.
    ///
    /// Both values come from the same locked read, so a client adopting the
    /// mark as its baseline misses nothing.
    pub fn snapshot_at(&self, scope: &Scope) -> (Timestamp, Vec<Row>) {
        self.store.read(scope, |table| {
            (table.high_water(), table.live_rows().cloned().collect())
        })
    }

    /// Largest timestamp assigned in the scope (0 if it has never been
    /// written).
    pub fn high_water(&self, scope: &Scope) -> Timestamp {
        self.store.read(scope, |table| table.high_water())
    }
}
