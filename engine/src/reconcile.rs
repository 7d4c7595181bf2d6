//! Reconciliation planning.
//!
//! Pure decision logic shared by every storage backend: which client
//! mutations apply and which conflict, whether a timestamp-gated write is
//! stale, and what a full-table replacement has to write. Nothing in here
//! touches storage; backends feed it the rows they read under the scope lock
//! and apply the plan inside the same transaction.
//!
//! # Conflict policy
//!
//! A client mutation conflicts when its row was modified on the server after
//! the client's baseline. The server's version always wins: the mutation is
//! dropped and the server row is part of the changes returned to the client,
//! which overwrites its local copy.

use crate::{
    clock::MAX_TIMESTAMP, error::Result, Error, FlatRow, Mutation, Row, RowId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Default upper bound on mutations per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Default tolerance for client-claimed edit times ahead of the server clock.
pub const DEFAULT_MAX_CLOCK_SKEW_MS: Timestamp = 5 * 60 * 1000;

/// Limits applied to incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Maximum number of mutations (or rows) in one request
    pub max_batch_size: usize,
    /// How far a claimed edit time may run ahead of the server clock.
    /// `None` disables the check.
    pub max_clock_skew_ms: Option<Timestamp>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_clock_skew_ms: Some(DEFAULT_MAX_CLOCK_SKEW_MS),
        }
    }
}

impl SyncOptions {
    /// Reject oversized batches.
    pub fn check_batch_len(&self, len: usize) -> Result<()> {
        if len > self.max_batch_size {
            return Err(Error::InvalidArgument(format!(
                "batch of {len} exceeds limit of {}",
                self.max_batch_size
            )));
        }
        Ok(())
    }

    /// Reject claimed edit times that are out of range or too far ahead of
    /// `now`. A claim far in the future would push the scope's timestamps
    /// past it permanently.
    pub fn check_claimed(&self, millis: Timestamp, now: Timestamp) -> Result<()> {
        if millis > MAX_TIMESTAMP {
            return Err(Error::InvalidArgument(format!(
                "timestamp {millis} out of range"
            )));
        }
        if let Some(skew) = self.max_clock_skew_ms {
            if millis > now.saturating_add(skew) {
                return Err(Error::InvalidArgument(format!(
                    "timestamp {millis} is more than {skew}ms ahead of server time"
                )));
            }
        }
        Ok(())
    }
}

/// What the server sends back after a sync call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// The baseline the client should adopt after applying `changes`
    pub new_timestamp: Timestamp,
    /// Rows (tombstones included) ordered by `modifiedAt`, then id
    pub changes: Vec<Row>,
    /// Ids of client mutations dropped because the server version won
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<RowId>,
}

impl SyncResult {
    /// Build a result from an ordered change list. The new baseline is the
    /// newest change, or `base` when nothing changed.
    pub fn from_changes(base: Timestamp, changes: Vec<Row>) -> Self {
        let new_timestamp = changes
            .iter()
            .map(|r| r.modified_at)
            .max()
            .map_or(base, |newest| newest.max(base));
        Self {
            new_timestamp,
            changes,
            conflicts: Vec::new(),
        }
    }

    /// Attach conflict diagnostics.
    pub fn with_conflicts(mut self, conflicts: Vec<RowId>) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Result of a timestamp-gated write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The write went through; carries the new row state
    Applied(Row),
    /// The write was older than the stored row and was dropped; carries the
    /// current row
    Stale(Row),
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }

    /// The row as it is stored after the call.
    pub fn row(&self) -> &Row {
        match self {
            WriteOutcome::Applied(row) | WriteOutcome::Stale(row) => row,
        }
    }

    pub fn into_row(self) -> Row {
        match self {
            WriteOutcome::Applied(row) | WriteOutcome::Stale(row) => row,
        }
    }
}

/// Split of a client batch against concurrent server changes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncPlan {
    /// Mutations to apply, in batch order
    pub apply: Vec<Mutation>,
    /// Row ids whose mutations were dropped, in first-seen order
    pub conflicts: Vec<RowId>,
}

/// Decide which mutations of `batch` survive against `server_changes`
/// (rows modified after the client's baseline).
pub fn plan_sync(server_changes: &[Row], batch: Vec<Mutation>) -> SyncPlan {
    let touched: HashSet<&str> = server_changes.iter().map(|r| r.id.as_str()).collect();
    let mut plan = SyncPlan::default();

    for mutation in batch {
        if touched.contains(mutation.row_id().as_str()) {
            if !plan.conflicts.contains(mutation.row_id()) {
                plan.conflicts.push(mutation.row_id().clone());
            }
        } else {
            plan.apply.push(mutation);
        }
    }

    plan
}

/// Whether a write claiming edit time `millis` is recent enough to replace
/// `current`. Ties go to the incoming write.
pub fn is_recent(current: Option<&Row>, millis: Timestamp) -> bool {
    current.map_or(true, |row| millis >= row.modified_at)
}

/// Mutations that turn the live rows `live_ids` into exactly `rows`:
/// tombstones for every live row missing from the input (in id order), then
/// an upsert per input row (in input order).
pub fn plan_replace<'a>(
    live_ids: impl IntoIterator<Item = &'a RowId>,
    rows: Vec<FlatRow>,
) -> Result<Vec<Mutation>> {
    let mut keep = HashSet::with_capacity(rows.len());
    for row in &rows {
        crate::row::validate_row_id(&row.id)?;
        if !keep.insert(row.id.clone()) {
            return Err(Error::InvalidArgument(format!(
                "duplicate row id in replacement: {}",
                row.id
            )));
        }
    }

    let mut dropped: Vec<&RowId> = live_ids
        .into_iter()
        .filter(|id| !keep.contains(*id))
        .collect();
    dropped.sort();

    let mut mutations: Vec<Mutation> = dropped.into_iter().cloned().map(Mutation::delete).collect();
    mutations.extend(rows.into_iter().map(|r| Mutation::upsert(r.id, r.fields)));
    Ok(mutations)
}

/// Collapse rows written by one batch to their final state, ordered by
/// `modified_at` then id.
pub fn final_states(written: Vec<Row>) -> Vec<Row> {
    let mut latest: BTreeMap<RowId, Row> = BTreeMap::new();
    for row in written {
        match latest.get(&row.id) {
            Some(existing) if existing.modified_at >= row.modified_at => {}
            _ => {
                latest.insert(row.id.clone(), row);
            }
        }
    }

    let mut rows: Vec<Row> = latest.into_values().collect();
    sort_changes(&mut rows);
    rows
}

/// Change Log ordering: `modified_at` ascending, ties by id.
pub fn sort_changes(rows: &mut [Row]) {
    rows.sort_by(|a, b| {
        a.modified_at
            .cmp(&b.modified_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
