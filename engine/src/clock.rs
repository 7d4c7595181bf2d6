//! Clocks and per-scope timestamp assignment.
//!
//! Wall-clock time only seeds timestamps. Every timestamp handed out inside a
//! scope is forced strictly above that scope's high-water mark, so ordering
//! survives clock skew and clocks that step backwards.

use crate::{error::Result, Error, Timestamp};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest timestamp the engine will assign or accept.
///
/// Kept within `i64` so rows round-trip through `BIGINT` columns.
pub const MAX_TIMESTAMP: Timestamp = i64::MAX as Timestamp;

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> Timestamp;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests and deterministic replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Set the current time. Going backwards is allowed.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward by `millis`.
    pub fn advance(&self, millis: Timestamp) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// High-water mark of the timestamps assigned within one scope.
///
/// Must only be ticked while holding the scope's exclusive lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeClock {
    high_water: Timestamp,
}

impl ScopeClock {
    /// Create a clock resuming from an existing high-water mark.
    pub fn new(high_water: Timestamp) -> Self {
        Self { high_water }
    }

    /// Largest timestamp assigned so far (0 if none).
    pub fn high_water(&self) -> Timestamp {
        self.high_water
    }

    /// Assign the next timestamp: `now` when it is ahead of the mark,
    /// otherwise one past the mark.
    ///
    /// Fails once the mark has reached [`MAX_TIMESTAMP`]; the scope cannot
    /// take further writes without repeating a timestamp.
    pub fn tick(&mut self, now: Timestamp) -> Result<Timestamp> {
        if self.high_water >= MAX_TIMESTAMP {
            return Err(Error::Storage(format!(
                "timestamp space exhausted at {}",
                self.high_water
            )));
        }
        let next = now.min(MAX_TIMESTAMP).max(self.high_water + 1);
        self.high_water = next;
        Ok(next)
    }

    /// Raise the mark to at least `timestamp` (used when loading rows).
    pub fn observe(&mut self, timestamp: Timestamp) {
        self.high_water = self.high_water.max(timestamp);
    }
}
