//! Request handlers for sync and local tables.
//!
//! Handlers turn raw path segments and bodies into typed engine arguments and
//! call the backend. Route functions in [`crate::routes`] stay thin.

mod localtable;
mod synctable;

pub use localtable::*;
pub use synctable::*;

use crate::error::{AppError, Result};
use tablesync_engine::{Scope, Timestamp, MAX_TIMESTAMP};

/// Build the scope addressed by a `{name}/{userid}` path pair.
pub fn parse_scope(table: &str, user: &str) -> Result<Scope> {
    Ok(Scope::new(table, user)?)
}

/// Parse a `{millis}` path segment: epoch milliseconds as a decimal integer.
pub fn parse_millis(raw: &str) -> Result<Timestamp> {
    let millis: Timestamp = raw
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid millis: {raw:?}")))?;
    if millis > MAX_TIMESTAMP {
        return Err(AppError::BadRequest(format!("millis out of range: {raw}")));
    }
    Ok(millis)
}
