//! PostgreSQL backend.
//!
//! Every mutating operation runs in one transaction that first takes the
//! scope's advisory lock, then rebuilds the scope clock from the stored
//! high-water mark. The reconciliation decisions are the engine's planning
//! functions, so both backends resolve conflicts identically.

use std::sync::Arc;

use sqlx::PgConnection;
use tablesync_engine::reconcile::{final_states, is_recent, plan_replace, plan_sync};
use tablesync_engine::row::validate_row_id;
use tablesync_engine::{
    Clock, Error as EngineError, FlatRow, Mutation, Payload, Row, Scope, ScopeClock,
    SyncOptions, SyncResult, Timestamp, WriteOutcome,
};

use crate::db::{self, Pool};
use crate::error::Result;

/// Sync and local tables stored in Postgres.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: Pool,
    clock: Arc<dyn Clock>,
    options: SyncOptions,
}

/// State of one scope inside a write transaction.
struct ScopeWriter<'c> {
    conn: &'c mut PgConnection,
    scope: &'c Scope,
    clock: ScopeClock,
    now: Timestamp,
}

impl<'c> ScopeWriter<'c> {
    async fn open(conn: &'c mut PgConnection, scope: &'c Scope, now: Timestamp) -> Result<Self> {
        db::lock_scope(&mut *conn, scope, true).await?;
        let high_water = db::high_water(&mut *conn, scope).await?;
        Ok(Self {
            conn,
            scope,
            clock: ScopeClock::new(high_water),
            now,
        })
    }

    async fn get(&mut self, id: &str) -> Result<Option<Row>> {
        Ok(db::get_row(&mut *self.conn, self.scope, id).await?)
    }

    async fn upsert(
        &mut self,
        id: &str,
        payload: Payload,
        claimed: Option<Timestamp>,
    ) -> Result<Row> {
        let timestamp = self.clock.tick(claimed.unwrap_or(self.now))?;
        let row = match self.get(id).await? {
            Some(mut row) => {
                row.update_payload(payload, timestamp);
                row
            }
            None => Row::new(id, payload, timestamp),
        };
        db::write_row(&mut *self.conn, self.scope, &row).await?;
        Ok(row)
    }

    async fn delete(&mut self, id: &str, claimed: Option<Timestamp>) -> Result<Row> {
        let mut row = self
            .get(id)
            .await?
            .ok_or_else(|| EngineError::RowNotFound(id.to_string()))?;
        row.mark_deleted(self.clock.tick(claimed.unwrap_or(self.now))?);
        db::write_row(&mut *self.conn, self.scope, &row).await?;
        Ok(row)
    }

    async fn apply(&mut self, mutation: Mutation) -> Result<Row> {
        match mutation {
            Mutation::Upsert { id, payload } => self.upsert(&id, payload, None).await,
            Mutation::Delete { id } => self.delete(&id, None).await,
        }
    }
}

impl PgBackend {
    pub fn new(pool: Pool, clock: Arc<dyn Clock>, options: SyncOptions) -> Self {
        Self {
            pool,
            clock,
            options,
        }
    }

    fn check_batch(&self, batch: &[Mutation]) -> Result<()> {
        self.options.check_batch_len(batch.len())?;
        batch.iter().try_for_each(Mutation::validate)?;
        Ok(())
    }

    pub async fn get_all(&self, scope: &Scope) -> Result<Vec<Row>> {
        Ok(db::live_rows(&self.pool, scope).await?)
    }

    pub async fn get_one(&self, scope: &Scope, id: &str) -> Result<Row> {
        validate_row_id(id)?;
        match db::get_row(&self.pool, scope, id).await? {
            Some(row) if row.is_live() => Ok(row),
            _ => Err(EngineError::RowNotFound(id.to_string()).into()),
        }
    }

    pub async fn raw(&self, scope: &Scope) -> Result<SyncResult> {
        let mut tx = self.pool.begin().await?;
        db::lock_scope(&mut *tx, scope, false).await?;
        let high_water = db::high_water(&mut *tx, scope).await?;
        let rows = db::live_rows(&mut *tx, scope).await?;
        tx.commit().await?;

        Ok(SyncResult {
            new_timestamp: high_water,
            changes: rows,
            conflicts: Vec::new(),
        })
    }

    pub async fn changes_after(&self, scope: &Scope, since: Timestamp) -> Result<SyncResult> {
        let rows = db::changes_after(&self.pool, scope, since).await?;
        Ok(SyncResult::from_changes(since, rows))
    }

    pub async fn insert_one(&self, scope: &Scope, id: &str, payload: Payload) -> Result<Row> {
        validate_row_id(id)?;
        let mut tx = self.pool.begin().await?;
        let row = ScopeWriter::open(&mut tx, scope, self.clock.now_millis())
            .await?
            .upsert(id, payload, None)
            .await?;
        tx.commit().await?;
        Ok(row)
    }

    pub async fn delete_one(&self, scope: &Scope, id: &str) -> Result<Row> {
        validate_row_id(id)?;
        let mut tx = self.pool.begin().await?;
        let row = ScopeWriter::open(&mut tx, scope, self.clock.now_millis())
            .await?
            .delete(id, None)
            .await?;
        tx.commit().await?;
        Ok(row)
    }

    pub async fn sync_at(
        &self,
        scope: &Scope,
        base: Timestamp,
        batch: Vec<Mutation>,
    ) -> Result<SyncResult> {
        self.check_batch(&batch)?;

        let mut tx = self.pool.begin().await?;
        let result = {
            let mut writer = ScopeWriter::open(&mut tx, scope, self.clock.now_millis()).await?;
            let server_changes = db::changes_after(&mut *writer.conn, scope, base).await?;
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
                writer.apply(mutation).await?;
            }

            let changes = db::changes_after(&mut *writer.conn, scope, base).await?;
            SyncResult::from_changes(base, changes).with_conflicts(plan.conflicts)
        };
        tx.commit().await?;

        Ok(result)
    }

    pub async fn insert_if_recent(
        &self,
        scope: &Scope,
        id: &str,
        payload: Payload,
        millis: Timestamp,
    ) -> Result<WriteOutcome> {
        validate_row_id(id)?;
        let now = self.clock.now_millis();
        self.options.check_claimed(millis, now)?;

        let mut tx = self.pool.begin().await?;
        let outcome = {
            let mut writer = ScopeWriter::open(&mut tx, scope, now).await?;
            match writer.get(id).await? {
                Some(current) if !is_recent(Some(&current), millis) => {
                    tracing::debug!(
                        scope = %scope,
                        row = %id,
                        millis,
                        current = current.modified_at,
                        "stale insert dropped"
                    );
                    WriteOutcome::Stale(current)
                }
                _ => WriteOutcome::Applied(writer.upsert(id, payload, Some(millis)).await?),
            }
        };
        tx.commit().await?;

        Ok(outcome)
    }

    pub async fn delete_if_recent(
        &self,
        scope: &Scope,
        id: &str,
        millis: Timestamp,
    ) -> Result<WriteOutcome> {
        validate_row_id(id)?;
        let now = self.clock.now_millis();
        self.options.check_claimed(millis, now)?;

        let mut tx = self.pool.begin().await?;
        let outcome = {
            let mut writer = ScopeWriter::open(&mut tx, scope, now).await?;
            let current = writer
                .get(id)
                .await?
                .ok_or_else(|| EngineError::RowNotFound(id.to_string()))?;
            if is_recent(Some(&current), millis) {
                WriteOutcome::Applied(writer.delete(id, Some(millis)).await?)
            } else {
                tracing::debug!(
                    scope = %scope,
                    row = %id,
                    millis,
                    current = current.modified_at,
                    "stale delete dropped"
                );
                WriteOutcome::Stale(current)
            }
        };
        tx.commit().await?;

        Ok(outcome)
    }

    pub async fn replace_all(&self, scope: &Scope, rows: Vec<FlatRow>) -> Result<SyncResult> {
        self.options.check_batch_len(rows.len())?;

        let mut tx = self.pool.begin().await?;
        let result = {
            let mut writer = ScopeWriter::open(&mut tx, scope, self.clock.now_millis()).await?;
            let live = db::live_ids(&mut *writer.conn, scope).await?;
            let mutations = plan_replace(&live, rows)?;

            let mut written = Vec::with_capacity(mutations.len());
            for mutation in mutations {
                written.push(writer.apply(mutation).await?);
            }

            tracing::debug!(scope = %scope, written = written.len(), "scope replaced");
            SyncResult {
                new_timestamp: writer.clock.high_water(),
                changes: final_states(written),
                conflicts: Vec::new(),
            }
        };
        tx.commit().await?;

        Ok(result)
    }

    pub async fn handle_changes(&self, scope: &Scope, batch: Vec<Mutation>) -> Result<SyncResult> {
        self.check_batch(&batch)?;

        let mut tx = self.pool.begin().await?;
        let result = {
            let mut writer = ScopeWriter::open(&mut tx, scope, self.clock.now_millis()).await?;
            let mut written = Vec::with_capacity(batch.len());
            for mutation in batch {
                written.push(writer.apply(mutation).await?);
            }
            SyncResult {
                new_timestamp: writer.clock.high_water(),
                changes: final_states(written),
                conflicts: Vec::new(),
            }
        };
        tx.commit().await?;

        Ok(result)
    }

    pub async fn local_get_all(&self, scope: &Scope) -> Result<Vec<FlatRow>> {
        Ok(db::get_local_rows(&self.pool, scope).await?)
    }

    pub async fn local_get_one(&self, scope: &Scope, id: &str) -> Result<FlatRow> {
        validate_row_id(id)?;
        db::get_local_row(&self.pool, scope, id)
            .await?
            .ok_or_else(|| EngineError::RowNotFound(id.to_string()).into())
    }

    pub async fn local_insert_one(&self, scope: &Scope, row: FlatRow) -> Result<FlatRow> {
        validate_row_id(&row.id)?;
        db::upsert_local_row(&self.pool, scope, &row).await?;
        Ok(row)
    }

    pub async fn local_delete_one(&self, scope: &Scope, id: &str) -> Result<()> {
        validate_row_id(id)?;
        if db::delete_local_row(&self.pool, scope, id).await? {
            Ok(())
        } else {
            Err(EngineError::RowNotFound(id.to_string()).into())
        }
    }
}
