//! Client-side row mutations.
//!
//! A sync batch is an ordered list of mutations. Inserts and updates are the
//! same thing on the wire (an upsert); deletes carry only the row id.

use crate::{error::Result, row::validate_row_id, Payload, RowId};
use serde::{Deserialize, Serialize};

/// A single client-side change to one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mutation {
    /// Insert or replace the row's payload
    #[serde(alias = "insert", alias = "update")]
    Upsert {
        #[serde(rename = "uniqueId")]
        id: RowId,
        payload: Payload,
    },
    /// Tombstone the row
    Delete {
        #[serde(rename = "uniqueId")]
        id: RowId,
    },
}

impl Mutation {
    /// Build an upsert.
    pub fn upsert(id: impl Into<RowId>, payload: Payload) -> Self {
        Mutation::Upsert {
            id: id.into(),
            payload,
        }
    }

    /// Build a delete.
    pub fn delete(id: impl Into<RowId>) -> Self {
        Mutation::Delete { id: id.into() }
    }

    /// Get the row ID this mutation targets.
    pub fn row_id(&self) -> &RowId {
        match self {
            Mutation::Upsert { id, .. } => id,
            Mutation::Delete { id } => id,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Mutation::Delete { .. })
    }

    /// Validate the mutation's fields.
    pub fn validate(&self) -> Result<()> {
        validate_row_id(self.row_id())
    }
}
