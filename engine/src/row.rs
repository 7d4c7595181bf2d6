//! Rows, scopes and payload validation.

use crate::{error::Result, Error, RowId, TableName, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Row payload: an opaque JSON object.
pub type Payload = serde_json::Map<String, Value>;

/// Key under which a flattened row carries its id.
pub const ID_FIELD: &str = "uniqueId";

const MAX_NAME_LEN: usize = 128;
const MAX_ROW_ID_LEN: usize = 255;

/// A `(table, user)` pair: the unit of isolation and locking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub table: TableName,
    pub user: UserId,
}

impl Scope {
    /// Create a validated scope.
    ///
    /// Table names are limited to ASCII alphanumerics, `_` and `-`.
    pub fn new(table: impl Into<TableName>, user: impl Into<UserId>) -> Result<Self> {
        let table = table.into();
        let user = user.into();

        if table.is_empty() || table.len() > MAX_NAME_LEN {
            return Err(Error::InvalidArgument(format!(
                "table name must be 1..={MAX_NAME_LEN} characters"
            )));
        }
        if !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidArgument(format!(
                "invalid table name: {table}"
            )));
        }
        if user.is_empty() || user.len() > MAX_NAME_LEN {
            return Err(Error::InvalidArgument(format!(
                "user id must be 1..={MAX_NAME_LEN} characters"
            )));
        }

        Ok(Self { table, user })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.user)
    }
}

/// Check that a row id is usable.
pub fn validate_row_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidArgument("row id must not be empty".into()));
    }
    if id.len() > MAX_ROW_ID_LEN {
        return Err(Error::InvalidArgument(format!(
            "row id longer than {MAX_ROW_ID_LEN} characters"
        )));
    }
    Ok(())
}

/// Convert an arbitrary JSON value into a payload.
pub fn payload_from_value(value: Value) -> Result<Payload> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidPayload(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A stored row of a sync table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Client-chosen identifier, unique within the scope
    #[serde(rename = "uniqueId")]
    pub id: RowId,
    /// Row data
    pub payload: Payload,
    /// Server-assigned modification time (epoch milliseconds)
    pub modified_at: Timestamp,
    /// Tombstone flag
    pub deleted: bool,
}

impl Row {
    /// Create a new live row.
    pub fn new(id: impl Into<RowId>, payload: Payload, modified_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            payload,
            modified_at,
            deleted: false,
        }
    }

    /// Check if the row is live (not a tombstone).
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Replace the payload and resurrect the row if it was deleted.
    pub fn update_payload(&mut self, payload: Payload, modified_at: Timestamp) {
        self.payload = payload;
        self.deleted = false;
        self.modified_at = modified_at;
    }

    /// Turn the row into a tombstone. The last payload is kept.
    pub fn mark_deleted(&mut self, modified_at: Timestamp) {
        self.deleted = true;
        self.modified_at = modified_at;
    }
}

/// A row in its flattened client form: `uniqueId` next to the payload fields.
///
/// This is the body format for single-row inserts, full-table replacement and
/// local tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    #[serde(rename = "uniqueId")]
    pub id: RowId,
    #[serde(flatten)]
    pub fields: Payload,
}

impl FlatRow {
    pub fn new(id: impl Into<RowId>, fields: Payload) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

impl From<&Row> for FlatRow {
    fn from(row: &Row) -> Self {
        let mut fields = row.payload.clone();
        fields.remove(ID_FIELD);
        Self {
            id: row.id.clone(),
            fields,
        }
    }
}
