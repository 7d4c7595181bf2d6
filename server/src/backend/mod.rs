//! Storage backends behind the HTTP surface.
//!
//! [`Backend::Memory`] serves everything from the engine's in-process store
//! and is what development setups and the test suite run on.
//! [`Backend::Postgres`] persists rows and serializes scopes with advisory
//! locks. Both expose the same operations with the same semantics.

mod postgres;

pub use postgres::PgBackend;

use std::sync::Arc;

use tablesync_engine::{
    Clock, FlatRow, LocalTables, Mutation, Payload, Row, Scope, SyncEngine, SyncOptions,
    SyncResult, Timestamp, WriteOutcome,
};

use crate::db::Pool;
use crate::error::Result;

/// In-process sync and local tables.
#[derive(Debug)]
pub struct MemoryBackend {
    sync: SyncEngine,
    local: LocalTables,
}

/// Where rows live.
#[derive(Debug)]
pub enum Backend {
    Memory(MemoryBackend),
    Postgres(PgBackend),
}

impl Backend {
    /// Backend keeping every row in memory.
    pub fn memory(clock: Arc<dyn Clock>, options: SyncOptions) -> Self {
        Backend::Memory(MemoryBackend {
            sync: SyncEngine::with_options(clock.clone(), options),
            local: LocalTables::new(clock),
        })
    }

    /// Backend persisting to an already migrated database.
    pub fn postgres(pool: Pool, clock: Arc<dyn Clock>, options: SyncOptions) -> Self {
        Backend::Postgres(PgBackend::new(pool, clock, options))
    }

    /// Short name for logs and the health endpoint.
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Memory(_) => "memory",
            Backend::Postgres(_) => "postgres",
        }
    }

    // ========================================================================
    // Sync tables
    // ========================================================================

    pub async fn get_all(&self, scope: &Scope) -> Result<Vec<Row>> {
        match self {
            Backend::Memory(m) => Ok(m.sync.get_all(scope)),
            Backend::Postgres(pg) => pg.get_all(scope).await,
        }
    }

    pub async fn get_one(&self, scope: &Scope, id: &str) -> Result<Row> {
        match self {
            Backend::Memory(m) => Ok(m.sync.get_one(scope, id)?),
            Backend::Postgres(pg) => pg.get_one(scope, id).await,
        }
    }

    pub async fn raw(&self, scope: &Scope) -> Result<SyncResult> {
        match self {
            Backend::Memory(m) => Ok(m.sync.raw(scope)),
            Backend::Postgres(pg) => pg.raw(scope).await,
        }
    }

    pub async fn changes_after(&self, scope: &Scope, since: Timestamp) -> Result<SyncResult> {
        match self {
            Backend::Memory(m) => Ok(m.sync.changes_after(scope, since)),
            Backend::Postgres(pg) => pg.changes_after(scope, since).await,
        }
    }

    pub async fn insert_one(&self, scope: &Scope, id: &str, payload: Payload) -> Result<Row> {
        match self {
            Backend::Memory(m) => Ok(m.sync.insert_one(scope, id, payload)?),
            Backend::Postgres(pg) => pg.insert_one(scope, id, payload).await,
        }
    }

    pub async fn delete_one(&self, scope: &Scope, id: &str) -> Result<Row> {
        match self {
            Backend::Memory(m) => Ok(m.sync.delete_one(scope, id)?),
            Backend::Postgres(pg) => pg.delete_one(scope, id).await,
        }
    }

    pub async fn sync_at(
        &self,
        scope: &Scope,
        base: Timestamp,
        batch: Vec<Mutation>,
    ) -> Result<SyncResult> {
        match self {
            Backend::Memory(m) => Ok(m.sync.sync_at(scope, base, batch)?),
            Backend::Postgres(pg) => pg.sync_at(scope, base, batch).await,
        }
    }

    pub async fn insert_if_recent(
        &self,
        scope: &Scope,
        id: &str,
        payload: Payload,
        millis: Timestamp,
    ) -> Result<WriteOutcome> {
        match self {
            Backend::Memory(m) => Ok(m.sync.insert_if_recent(scope, id, payload, millis)?),
            Backend::Postgres(pg) => pg.insert_if_recent(scope, id, payload, millis).await,
        }
    }

    pub async fn delete_if_recent(
        &self,
        scope: &Scope,
        id: &str,
        millis: Timestamp,
    ) -> Result<WriteOutcome> {
        match self {
            Backend::Memory(m) => Ok(m.sync.delete_if_recent(scope, id, millis)?),
            Backend::Postgres(pg) => pg.delete_if_recent(scope, id, millis).await,
        }
    }

    pub async fn replace_all(&self, scope: &Scope, rows: Vec<FlatRow>) -> Result<SyncResult> {
        match self {
            Backend::Memory(m) => Ok(m.sync.replace_all(scope, rows)?),
            Backend::Postgres(pg) => pg.replace_all(scope, rows).await,
        }
    }

    pub async fn handle_changes(&self, scope: &Scope, batch: Vec<Mutation>) -> Result<SyncResult> {
        match self {
            Backend::Memory(m) => Ok(m.sync.handle_changes(scope, batch)?),
            Backend::Postgres(pg) => pg.handle_changes(scope, batch).await,
        }
    }

    // ========================================================================
    // Local tables
    // ========================================================================

    pub async fn local_get_all(&self, scope: &Scope) -> Result<Vec<FlatRow>> {
        match self {
            Backend::Memory(m) => Ok(m.local.get_all(scope)),
            Backend::Postgres(pg) => pg.local_get_all(scope).await,
        }
    }

    pub async fn local_get_one(&self, scope: &Scope, id: &str) -> Result<FlatRow> {
        match self {
            Backend::Memory(m) => Ok(m.local.get_one(scope, id)?),
            Backend::Postgres(pg) => pg.local_get_one(scope, id).await,
        }
    }

    pub async fn local_insert_one(&self, scope: &Scope, row: FlatRow) -> Result<FlatRow> {
        match self {
            Backend::Memory(m) => Ok(m.local.insert_one(scope, row)?),
            Backend::Postgres(pg) => pg.local_insert_one(scope, row).await,
        }
    }

    pub async fn local_delete_one(&self, scope: &Scope, id: &str) -> Result<()> {
        match self {
            Backend::Memory(m) => Ok(m.local.delete_one(scope, id)?),
            Backend::Postgres(pg) => pg.local_delete_one(scope, id).await,
        }
    }
}
