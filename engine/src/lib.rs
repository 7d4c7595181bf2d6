//! # Tablesync Engine
//!
//! Row-level synchronization for offline-first clients that keep per-user
//! replicas of named tables.
//!
//! The crate has no network IO. It provides an in-memory row store with
//! per-scope locking, a change-log query surface over it, and the
//! reconciliation primitives clients sync through. The planning functions in
//! [`reconcile`] are pure and are shared with persistent backends.
//!
//! ## Core Concepts
//!
//! ### Scopes and rows
//!
//! Every table is partitioned by user. A [`Scope`] is a `(table, user)` pair
//! and the unit of isolation: operations on different scopes never block each
//! other, operations on one scope are serialized.
//!
//! A [`Row`] has:
//! - A client-chosen id, unique in its scope
//! - A JSON object payload
//! - A server-assigned `modified_at` (epoch milliseconds)
//! - A tombstone flag; deleted rows are kept so other devices learn of the
//!   deletion
//!
//! ### Timestamps
//!
//! Each scope keeps a high-water mark ([`ScopeClock`]). A new timestamp is the
//! wall clock reading or one past the mark, whichever is larger, so
//! timestamps within a scope strictly increase even if the clock does not.
//! The clock is injected ([`Clock`]); tests use [`ManualClock`].
//!
//! ### Syncing
//!
//! [`SyncEngine::sync_at`] takes the client's baseline and its pending
//! [`Mutation`]s, drops mutations on rows the server changed since the
//! baseline (the server wins), applies the rest, and returns every row
//! changed since the baseline as a [`SyncResult`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tablesync_engine::{payload_from_value, ManualClock, Mutation, Scope, SyncEngine};
//!
//! let clock = Arc::new(ManualClock::new(1_000));
//! let engine = SyncEngine::new(clock.clone());
//! let scope = Scope::new("notes", "u1").unwrap();
//!
//! // Initial sync from an empty baseline pushes one note
//! let note = payload_from_value(json!({"text": "a"})).unwrap();
//! let result = engine
//!     .sync_at(&scope, 0, vec![Mutation::upsert("r1", note)])
//!     .unwrap();
//! assert_eq!(result.new_timestamp, 1_000);
//! assert_eq!(result.changes.len(), 1);
//!
//! // Nothing changed since: an empty sync is a no-op
//! let again = engine.sync_at(&scope, result.new_timestamp, vec![]).unwrap();
//! assert!(again.changes.is_empty());
//! ```

pub mod changelog;
pub mod clock;
pub mod error;
pub mod local;
pub mod mutation;
pub mod reconcile;
pub mod row;
pub mod store;
pub mod sync;

// Re-export main types at crate root
pub use changelog::ChangeLog;
pub use clock::{Clock, ManualClock, ScopeClock, SystemClock, MAX_TIMESTAMP};
pub use error::Error;
pub use local::LocalTables;
pub use mutation::Mutation;
pub use reconcile::{SyncOptions, SyncPlan, SyncResult, WriteOutcome};
pub use row::{payload_from_value, FlatRow, Payload, Row, Scope};
pub use store::{RowStore, ScopeTable, ScopeTxn};
pub use sync::SyncEngine;

/// Type aliases for clarity
pub type RowId = String;
pub type TableName = String;
pub type UserId = String;
pub type Timestamp = u64;
