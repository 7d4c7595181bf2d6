//! Error types for the sync engine.

use crate::RowId;
use thiserror::Error;

/// All possible errors from the sync engine.
///
/// Conflicts and stale writes are deliberately absent: they are resolved
/// silently and reported through [`crate::SyncResult`] and
/// [`crate::WriteOutcome`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("row not found: {0}")]
    RowNotFound(RowId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl Error {
    /// Whether the error was caused by the caller's input rather than the
    /// storage layer.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Error::Storage(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
