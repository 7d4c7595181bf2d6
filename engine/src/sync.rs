//! Sync Engine - reconciliation primitives over the Row Store.
//!
//! Every mutating primitive runs inside a single scope transaction, so its
//! read-modify-write sequence is atomic with respect to other writers on the
//! same scope and all-or-nothing on failure.

use crate::{
    changelog::ChangeLog,
    clock::Clock,
    error::Result,
    reconcile::{final_states, is_recent, plan_replace, plan_sync, SyncOptions},
    row::validate_row_id,
    FlatRow, Mutation, Payload, Row, RowStore, Scope, SyncResult, Timestamp, WriteOutcome,
};
use std::sync::Arc;

/// The sync-table service: conflict-aware operations on per-user tables.
#[derive(Debug)]
pub struct SyncEngine {
    store: RowStore,
    options: SyncOptions,
}

impl SyncEngine {
    /// Create an engine with default limits.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_options(clock, SyncOptions::default())
    }

    pub fn with_options(clock: Arc<dyn Clock>, options: SyncOptions) -> Self {
        Self {
            store: RowStore::new(clock),
            options,
        }
    }

    pub fn store(&self) -> &RowStore {
        &self.store
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn change_log(&self) -> ChangeLog<'_> {
        ChangeLog::new(&self.store)
    }

    /// All live rows of the scope.
    pub fn get_all(&self, scope: &Scope) -> Vec<Row> {
        self.store.get_all(scope)
    }

    /// One live row.
    pub fn get_one(&self, scope: &Scope, id: &str) -> Result<Row> {
        self.store.get(scope, id)
    }

    /// Full snapshot for an initial sync: every live row, with the scope's
    /// high-water mark as the new baseline.
    pub fn raw(&self, scope: &Scope) -> SyncResult {
        let (high_water, rows) = self.change_log().snapshot_at(scope);
        SyncResult {
            new_timestamp: high_water,
            changes: rows,
            conflicts: Vec::new(),
        }
    }

    /// Everything changed after `since`, tombstones included.
    pub fn changes_after(&self, scope: &Scope, since: Timestamp) -> SyncResult {
        SyncResult::from_changes(since, self.change_log().changes_after(scope, since))
    }

    /// Unconditional upsert.
    pub fn insert_one(&self, scope: &Scope, id: &str, payload: Payload) -> Result<Row> {
        self.store.upsert(scope, id, payload)
    }

    /// Unconditional delete.
    pub fn delete_one(&self, scope: &Scope, id: &str) -> Result<Row> {
        self.store.delete(scope, id)
    }

    /// Two-way merge of a client batch against server changes since `base`.
    ///
    /// Mutations on rows the server changed after `base` are dropped (server
    /// wins) and reported in [`SyncResult::conflicts`]. The remaining ones
    /// are applied in order. The result lists every row changed after `base`,
    /// including the ones just written.
    pub fn sync_at(
        &self,
        scope: &Scope,
        base: Timestamp,
        batch: Vec<Mutation>,
    ) -> Result<SyncResult> {
        self.check_batch(&batch)?;

        self.store.transact(scope, |txn| {
            let server_changes = txn.changes_after(base);
            let plan = plan_sync(&server_changes, batch);

            if !plan.conflicts.is_empty() {
                tracing::debug!(
                    scope = %scope,
                    base,
                    conflicts = ?plan.conflicts,
                    "client mutations lost to concurrent server changes"
                );
            }

            for mutation in plan.apply {
                txn.apply(mutation)?;
            }

            let changes = txn.changes_after(base);
            Ok(SyncResult::from_changes(base, changes).with_conflicts(plan.conflicts))
        })
    }

    /// Upsert unless the stored row is newer than the claimed edit time
    /// `millis`.
    pub fn insert_if_recent(
        &self,
        scope: &Scope,
        id: &str,
        payload: Payload,
        millis: Timestamp,
    ) -> Result<WriteOutcome> {
        validate_row_id(id)?;
        self.options
            .check_claimed(millis, self.store.clock().now_millis())?;

        self.store.transact(scope, |txn| {
            if let Some(current) = txn.get(id) {
                if !is_recent(Some(current), millis) {
                    tracing::debug!(
                        scope = %scope,
                        row = %id,
                        millis,
                        current = current.modified_at,
                        "stale insert dropped"
                    );
                    return Ok(WriteOutcome::Stale(current.clone()));
                }
            }
            txn.upsert(id, payload, Some(millis))
                .map(WriteOutcome::Applied)
        })
    }

    /// Delete unless the stored row is newer than the claimed edit time
    /// `millis`. Fails with `RowNotFound` if the row was never created.
    pub fn delete_if_recent(
        &self,
        scope: &Scope,
        id: &str,
        millis: Timestamp,
    ) -> Result<WriteOutcome> {
        validate_row_id(id)?;
        self.options
            .check_claimed(millis, self.store.clock().now_millis())?;

        self.store.transact(scope, |txn| {
            let current = txn
                .get(id)
                .ok_or_else(|| crate::Error::RowNotFound(id.to_string()))?;
            if !is_recent(Some(current), millis) {
                tracing::debug!(
                    scope = %scope,
                    row = %id,
                    millis,
                    current = current.modified_at,
                    "stale delete dropped"
                );
                return Ok(WriteOutcome::Stale(current.clone()));
            }
            txn.delete(id, Some(millis)).map(WriteOutcome::Applied)
        })
    }

    /// Make the scope's live rows exactly `rows`: tombstone the rest, upsert
    /// every given row. Returns the rows written.
    pub fn replace_all(&self, scope: &Scope, rows: Vec<FlatRow>) -> Result<SyncResult> {
        self.options.check_batch_len(rows.len())?;

        self.store.transact(scope, |txn| {
            let live = txn.live_ids();
            let mutations = plan_replace(&live, rows)?;

            let mut written = Vec::with_capacity(mutations.len());
            for mutation in mutations {
                written.push(txn.apply(mutation)?);
            }

            tracing::debug!(scope = %scope, written = written.len(), "scope replaced");
            Ok(SyncResult {
                new_timestamp: txn.high_water(),
                changes: final_states(written),
                conflicts: Vec::new(),
            })
        })
    }

    /// Apply a batch without conflict detection or timestamp gating.
    /// Returns the final state of every row the batch wrote.
    pub fn handle_changes(&self, scope: &Scope, batch: Vec<Mutation>) -> Result<SyncResult> {
        self.check_batch(&batch)?;

        self.store.transact(scope, |txn| {
            let mut written = Vec::with_capacity(batch.len());
            for mutation in batch {
                written.push(txn.apply(mutation)?);
            }
            Ok(SyncResult {
                new_timestamp: txn.high_water(),
                changes: final_states(written),
                conflicts: Vec::new(),
            })
        })
    }

    fn check_batch(&self, batch: &[Mutation]) -> Result<()> {
        self.options.check_batch_len(batch.len())?;
        batch.iter().try_for_each(Mutation::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MAX_TIMESTAMP};
    use crate::row::payload_from_value;
    use crate::Error;
    use serde_json::json;

    fn payload(text: &str) -> Payload {
        payload_from_value(json!({ "text": text })).unwrap()
    }

    fn setup() -> (Arc<ManualClock>, SyncEngine, Scope) {
        let clock = Arc::new(ManualClock::new(1000));
        let engine = SyncEngine::new(clock.clone());
        (clock, engine, Scope::new("notes", "u1").unwrap())
    }

    #[test]
    fn sync_at_returns_server_rows_for_initial_sync() {
        let (_, engine, scope) = setup();
        let row = engine.insert_one(&scope, "r1", payload("a")).unwrap();

        let result = engine.sync_at(&scope, 0, vec![]).unwrap();
        assert_eq!(result.changes, vec![row.clone()]);
        assert_eq!(result.new_timestamp, row.modified_at);
        assert!(!result.has_conflicts());
    }

    #[test]
    fn sync_at_applies_client_update() {
        let (clock, engine, scope) = setup();
        let t0 = engine.insert_one(&scope, "r1", payload("a")).unwrap().modified_at;
        clock.advance(50);

        let result = engine
            .sync_at(&scope, t0, vec![Mutation::upsert("r1", payload("b"))])
            .unwrap();

        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].payload["text"], "b");
        assert!(result.new_timestamp > t0);
        assert_eq!(engine.get_one(&scope, "r1").unwrap().payload["text"], "b");
    }

    #[test]
    fn sync_at_server_wins_on_conflict() {
        let (clock, engine, scope) = setup();
        let t0 = engine.insert_one(&scope, "r1", payload("a")).unwrap().modified_at;

        clock.advance(10);
        let a = engine
            .sync_at(&scope, t0, vec![Mutation::upsert("r1", payload("b"))])
            .unwrap();

        clock.advance(10);
        let b = engine
            .sync_at(&scope, t0, vec![Mutation::upsert("r1", payload("c"))])
            .unwrap();

        assert_eq!(b.conflicts, vec!["r1".to_string()]);
        assert_eq!(b.changes.len(), 1);
        assert_eq!(b.changes[0].payload["text"], "b");
        assert_eq!(b.new_timestamp, a.new_timestamp);
        assert_eq!(engine.get_one(&scope, "r1").unwrap().payload["text"], "b");
    }

    #[test]
    fn sync_at_failure_is_all_or_nothing() {
        let (_, engine, scope) = setup();
        let before = engine.raw(&scope);

        let err = engine
            .sync_at(
                &scope,
                0,
                vec![
                    Mutation::upsert("r1", payload("a")),
                    Mutation::delete("never-created"),
                ],
            )
            .unwrap_err();

        assert!(matches!(err, Error::RowNotFound(_)));
        assert_eq!(engine.raw(&scope), before);
        assert_eq!(engine.change_log().high_water(&scope), 0);
    }

    #[test]
    fn sync_at_rejects_invalid_ids() {
        let (_, engine, scope) = setup();
        let err = engine
            .sync_at(&scope, 0, vec![Mutation::upsert("", payload("a"))])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn insert_if_recent_drops_stale_write() {
        let (_, engine, scope) = setup();
        let first = engine
            .insert_if_recent(&scope, "r1", payload("first"), 1000)
            .unwrap();
        assert!(first.is_applied());

        let second = engine
            .insert_if_recent(&scope, "r1", payload("second"), 999)
            .unwrap();
        assert!(!second.is_applied());
        assert_eq!(second.row().payload["text"], "first");
        assert_eq!(engine.get_one(&scope, "r1").unwrap().payload["text"], "first");
    }

    #[test]
    fn insert_if_recent_accepts_equal_time() {
        let (_, engine, scope) = setup();
        let first = engine
            .insert_if_recent(&scope, "r1", payload("a"), 1000)
            .unwrap();
        let stamp = first.row().modified_at;

        let second = engine
            .insert_if_recent(&scope, "r1", payload("b"), stamp)
            .unwrap();
        assert!(second.is_applied());
        assert!(second.row().modified_at > stamp);
    }

    #[test]
    fn insert_if_recent_rejects_far_future_claims() {
        let (_, engine, scope) = setup();
        let err = engine
            .insert_if_recent(&scope, "r1", payload("a"), 1000 + 24 * 3600 * 1000)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn delete_if_recent_gate() {
        let (clock, engine, scope) = setup();
        let row = engine.insert_one(&scope, "r1", payload("a")).unwrap();

        let stale = engine
            .delete_if_recent(&scope, "r1", row.modified_at - 1)
            .unwrap();
        assert!(!stale.is_applied());
        assert!(engine.get_one(&scope, "r1").is_ok());

        clock.advance(5);
        let applied = engine
            .delete_if_recent(&scope, "r1", row.modified_at + 5)
            .unwrap();
        assert!(applied.is_applied());
        assert!(applied.row().deleted);
        assert!(engine.get_one(&scope, "r1").is_err());
    }

    #[test]
    fn delete_if_recent_missing_row() {
        let (_, engine, scope) = setup();
        assert!(matches!(
            engine.delete_if_recent(&scope, "ghost", 1000),
            Err(Error::RowNotFound(_))
        ));
    }

    #[test]
    fn overlong_ids_rejected_before_lookup() {
        let (_, engine, scope) = setup();
        let id = "x".repeat(256);
        assert!(matches!(
            engine.delete_if_recent(&scope, &id, 1000),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(engine.get_one(&scope, &id), Err(Error::InvalidArgument(_))));
        assert!(matches!(engine.delete_one(&scope, &id), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn exhausted_timestamps_fail_instead_of_repeating() {
        let clock = Arc::new(ManualClock::new(1000));
        let engine = SyncEngine::with_options(
            clock,
            SyncOptions {
                max_clock_skew_ms: None,
                ..SyncOptions::default()
            },
        );
        let scope = Scope::new("notes", "u1").unwrap();

        let first = engine
            .insert_if_recent(&scope, "r1", payload("a"), MAX_TIMESTAMP)
            .unwrap();
        assert!(first.is_applied());
        assert_eq!(first.row().modified_at, MAX_TIMESTAMP);

        assert!(matches!(
            engine.insert_one(&scope, "r1", payload("b")),
            Err(Error::Storage(_))
        ));
        assert!(matches!(
            engine.insert_one(&scope, "r2", payload("c")),
            Err(Error::Storage(_))
        ));
        assert!(matches!(
            engine.sync_at(&scope, MAX_TIMESTAMP, vec![Mutation::delete("r1")]),
            Err(Error::Storage(_))
        ));

        let rows = engine.get_all(&scope);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload["text"], "a");
        assert_eq!(rows[0].modified_at, MAX_TIMESTAMP);
    }

    #[test]
    fn replace_all_overwrites_scope() {
        let (_, engine, scope) = setup();
        engine.insert_one(&scope, "old", payload("x")).unwrap();
        engine.insert_one(&scope, "keep", payload("y")).unwrap();

        let result = engine
            .replace_all(
                &scope,
                vec![
                    FlatRow::new("keep", payload("y2")),
                    FlatRow::new("new", payload("z")),
                ],
            )
            .unwrap();

        assert_eq!(result.changes.len(), 3);
        assert_eq!(result.new_timestamp, engine.change_log().high_water(&scope));

        let live: Vec<String> = engine.get_all(&scope).into_iter().map(|r| r.id).collect();
        assert_eq!(live, vec!["keep", "new"]);
        assert_eq!(engine.get_one(&scope, "keep").unwrap().payload["text"], "y2");

        let tombstones = engine.changes_after(&scope, 0);
        assert!(tombstones.changes.iter().any(|r| r.id == "old" && r.deleted));
    }

    #[test]
    fn replace_all_rejects_duplicates_without_writing() {
        let (_, engine, scope) = setup();
        engine.insert_one(&scope, "a", payload("x")).unwrap();

        let err = engine
            .replace_all(
                &scope,
                vec![FlatRow::new("b", payload("1")), FlatRow::new("b", payload("2"))],
            )
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(engine.get_all(&scope).len(), 1);
    }

    #[test]
    fn handle_changes_ignores_conflicts() {
        let (clock, engine, scope) = setup();
        engine.insert_one(&scope, "r1", payload("server")).unwrap();
        clock.advance(1);

        let result = engine
            .handle_changes(
                &scope,
                vec![
                    Mutation::upsert("r1", payload("client")),
                    Mutation::upsert("r2", payload("new")),
                    Mutation::delete("r2"),
                ],
            )
            .unwrap();

        assert_eq!(result.changes.len(), 2);
        assert_eq!(result.new_timestamp, engine.change_log().high_water(&scope));
        assert_eq!(engine.get_one(&scope, "r1").unwrap().payload["text"], "client");
        let r2 = result.changes.iter().find(|r| r.id == "r2").unwrap();
        assert!(r2.deleted);
    }

    #[test]
    fn handle_changes_batch_limit() {
        let clock = Arc::new(ManualClock::new(1000));
        let engine = SyncEngine::with_options(
            clock,
            SyncOptions {
                max_batch_size: 1,
                ..SyncOptions::default()
            },
        );
        let scope = Scope::new("notes", "u1").unwrap();

        let err = engine
            .handle_changes(
                &scope,
                vec![Mutation::delete("a"), Mutation::delete("b")],
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn raw_uses_high_water_as_baseline() {
        let (_, engine, scope) = setup();
        engine.insert_one(&scope, "a", payload("1")).unwrap();
        engine.insert_one(&scope, "b", payload("2")).unwrap();
        engine.delete_one(&scope, "b").unwrap();

        let raw = engine.raw(&scope);
        assert_eq!(raw.changes.len(), 1);
        assert_eq!(raw.new_timestamp, 1002);

        let after = engine.changes_after(&scope, raw.new_timestamp);
        assert!(after.changes.is_empty());
        assert_eq!(after.new_timestamp, raw.new_timestamp);
    }
}
