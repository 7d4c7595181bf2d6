//! Row Store - per-scope row storage with tombstones.
//!
//! Every `(table, user)` scope owns a [`ScopeTable`] behind its own
//! read-write lock, so scopes never block each other. Within a scope, writes
//! go through a [`ScopeTxn`]: it holds the exclusive lock, stages rows, and
//! publishes them only when the caller's closure returns `Ok`.

use crate::{
    clock::{Clock, ScopeClock},
    error::Result,
    reconcile::sort_changes,
    Error, Mutation, Payload, Row, RowId, Scope, Timestamp,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The committed rows of one scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeTable {
    rows: BTreeMap<RowId, Row>,
    /// `(modified_at, id)` for every row, tombstones included
    index: BTreeSet<(Timestamp, RowId)>,
    clock: ScopeClock,
}

impl ScopeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a row by ID, tombstones included.
    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.get(id)
    }

    /// Live rows ordered by id.
    pub fn live_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values().filter(|r| r.is_live())
    }

    /// Rows modified strictly after `timestamp`, ordered by
    /// `(modified_at, id)`.
    pub fn rows_after(&self, timestamp: Timestamp) -> impl Iterator<Item = &Row> {
        // Timestamps are capped well below `Timestamp::MAX`, so saturating
        // here cannot skip a row.
        let lower = (timestamp.saturating_add(1), RowId::new());
        self.index
            .range(lower..)
            .filter_map(move |(_, id)| self.rows.get(id))
    }

    /// Largest timestamp ever assigned in this scope.
    pub fn high_water(&self) -> Timestamp {
        self.clock.high_water()
    }

    /// Count of live rows.
    pub fn len(&self) -> usize {
        self.live_rows().count()
    }

    /// Check if the table has no live rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of rows including tombstones.
    pub fn total_len(&self) -> usize {
        self.rows.len()
    }

    fn remove_row(&mut self, id: &str) -> Option<Row> {
        let row = self.rows.remove(id)?;
        self.index.remove(&(row.modified_at, row.id.clone()));
        Some(row)
    }

    fn commit_row(&mut self, row: Row) {
        if let Some(previous) = self.rows.get(&row.id) {
            self.index.remove(&(previous.modified_at, previous.id.clone()));
        }
        self.index.insert((row.modified_at, row.id.clone()));
        self.clock.observe(row.modified_at);
        self.rows.insert(row.id.clone(), row);
    }
}

/// An open write transaction on one scope.
///
/// Reads see committed rows overlaid with the rows staged so far. Staged
/// rows always carry timestamps above the committed high-water mark.
#[derive(Debug)]
pub struct ScopeTxn<'a> {
    table: &'a ScopeTable,
    staged: BTreeMap<RowId, Row>,
    clock: ScopeClock,
    now: Timestamp,
}

impl<'a> ScopeTxn<'a> {
    fn new(table: &'a ScopeTable, now: Timestamp) -> Self {
        Self {
            table,
            staged: BTreeMap::new(),
            clock: table.clock,
            now,
        }
    }

    /// Wall-clock time sampled when the transaction opened.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Largest timestamp assigned so far, staged writes included.
    pub fn high_water(&self) -> Timestamp {
        self.clock.high_water()
    }

    /// Get a row by ID, tombstones included.
    pub fn get(&self, id: &str) -> Option<&Row> {
        self.staged.get(id).or_else(|| self.table.get(id))
    }

    /// Get a live row by ID.
    pub fn get_live(&self, id: &str) -> Option<&Row> {
        self.get(id).filter(|r| r.is_live())
    }

    /// Ids of all live rows, ordered.
    pub fn live_ids(&self) -> Vec<RowId> {
        let committed = self
            .table
            .live_rows()
            .filter(|r| !self.staged.contains_key(&r.id));
        let staged = self.staged.values().filter(|r| r.is_live());

        let mut ids: Vec<RowId> = committed.chain(staged).map(|r| r.id.clone()).collect();
        ids.sort();
        ids
    }

    /// Rows modified after `timestamp`, including staged writes, in Change
    /// Log order.
    pub fn changes_after(&self, timestamp: Timestamp) -> Vec<Row> {
        let mut changes: Vec<Row> = self
            .table
            .rows_after(timestamp)
            .filter(|r| !self.staged.contains_key(&r.id))
            .cloned()
            .collect();

        let mut staged: Vec<Row> = self
            .staged
            .values()
            .filter(|r| r.modified_at > timestamp)
            .cloned()
            .collect();
        sort_changes(&mut staged);

        changes.extend(staged);
        changes
    }

    /// Insert or replace a row, resurrecting tombstones.
    ///
    /// `claimed` is a client edit time that replaces the wall clock as the
    /// timestamp seed; the scope mark still wins if it is ahead.
    pub fn upsert(
        &mut self,
        id: &str,
        payload: Payload,
        claimed: Option<Timestamp>,
    ) -> Result<Row> {
        let timestamp = self.next_timestamp(claimed)?;
        let row = match self.get(id) {
            Some(existing) => {
                let mut row = existing.clone();
                row.update_payload(payload, timestamp);
                row
            }
            None => Row::new(id, payload, timestamp),
        };
        self.staged.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    /// Tombstone a row. Fails with `RowNotFound` if it was never created.
    pub fn delete(&mut self, id: &str, claimed: Option<Timestamp>) -> Result<Row> {
        let mut row = self
            .get(id)
            .cloned()
            .ok_or_else(|| Error::RowNotFound(id.to_string()))?;
        row.mark_deleted(self.next_timestamp(claimed)?);
        self.staged.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    /// Apply one client mutation.
    pub fn apply(&mut self, mutation: Mutation) -> Result<Row> {
        match mutation {
            Mutation::Upsert { id, payload } => self.upsert(&id, payload, None),
            Mutation::Delete { id } => self.delete(&id, None),
        }
    }

    fn next_timestamp(&mut self, claimed: Option<Timestamp>) -> Result<Timestamp> {
        self.clock.tick(claimed.unwrap_or(self.now))
    }

    fn into_staged(self) -> BTreeMap<RowId, Row> {
        self.staged
    }
}

/// Per-scope storage of rows.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct RowStore {
    scopes: DashMap<Scope, Arc<RwLock<ScopeTable>>>,
    clock: Arc<dyn Clock>,
}

impl RowStore {
    /// Create an empty store using `clock` for timestamps.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            scopes: DashMap::new(),
            clock,
        }
    }

    /// The clock timestamps are drawn from.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Number of scopes that have seen at least one write.
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Run `f` against a consistent snapshot of the scope.
    ///
    /// Unknown scopes read as empty and are not created.
    pub fn read<T>(&self, scope: &Scope, f: impl FnOnce(&ScopeTable) -> T) -> T {
        // Clone the Arc out so the map shard is not held while waiting on the
        // scope lock.
        let table = self.scopes.get(scope).map(|entry| Arc::clone(entry.value()));
        match table {
            Some(table) => f(&*table.read()),
            None => f(&ScopeTable::default()),
        }
    }

    /// Run `f` inside an exclusive transaction on the scope.
    ///
    /// Staged writes are committed only if `f` returns `Ok`; on `Err` the
    /// scope is left exactly as it was. A scope that ends up holding no rows
    /// is dropped from the map again.
    pub fn transact<T>(
        &self,
        scope: &Scope,
        f: impl FnOnce(&mut ScopeTxn<'_>) -> Result<T>,
    ) -> Result<T> {
        let table = Arc::clone(self.scopes.entry(scope.clone()).or_default().value());

        let (result, empty) = {
            let mut guard = table.write();
            let mut txn = ScopeTxn::new(&*guard, self.clock.now_millis());
            let result = match f(&mut txn) {
                Ok(value) => {
                    let staged = txn.into_staged();
                    if !staged.is_empty() {
                        tracing::trace!(
                            scope = %scope,
                            rows = staged.len(),
                            "committing scope transaction"
                        );
                    }
                    for row in staged.into_values() {
                        guard.commit_row(row);
                    }
                    Ok(value)
                }
                Err(err) => Err(err),
            };
            (result, guard.total_len() == 0)
        };

        drop(table);
        if empty {
            self.discard_if_empty(scope);
        }
        result
    }

    /// Remove a scope that holds no rows, unless another caller still has a
    /// handle on it.
    fn discard_if_empty(&self, scope: &Scope) {
        self.scopes.remove_if(scope, |_, table| {
            Arc::strong_count(table) == 1 && table.read().total_len() == 0
        });
    }

    /// Get a live row.
    pub fn get(&self, scope: &Scope, id: &str) -> Result<Row> {
        crate::row::validate_row_id(id)?;
        self.read(scope, |table| {
            table
                .get(id)
                .filter(|r| r.is_live())
                .cloned()
                .ok_or_else(|| Error::RowNotFound(id.to_string()))
        })
    }

    /// All live rows ordered by id.
    pub fn get_all(&self, scope: &Scope) -> Vec<Row> {
        self.read(scope, |table| table.live_rows().cloned().collect())
    }

    /// Insert or replace a row with a fresh timestamp.
    pub fn upsert(&self, scope: &Scope, id: &str, payload: Payload) -> Result<Row> {
        crate::row::validate_row_id(id)?;
        self.transact(scope, |txn| txn.upsert(id, payload, None))
    }

    /// Tombstone a row with a fresh timestamp.
    pub fn delete(&self, scope: &Scope, id: &str) -> Result<Row> {
        crate::row::validate_row_id(id)?;
        self.transact(scope, |txn| txn.delete(id, None))
    }

    /// Physically remove a row, leaving no tombstone.
    ///
    /// Only for stores nobody syncs from: replicas never learn of the removal.
    pub fn remove(&self, scope: &Scope, id: &str) -> Result<Row> {
        crate::row::validate_row_id(id)?;
        let table = self
            .scopes
            .get(scope)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::RowNotFound(id.to_string()))?;

        let (removed, empty) = {
            let mut guard = table.write();
            let removed = guard.remove_row(id);
            (removed, guard.total_len() == 0)
        };

        drop(table);
        if empty {
            self.discard_if_empty(scope);
        }
        removed.ok_or_else(|| Error::RowNotFound(id.to_string()))
    }
}
