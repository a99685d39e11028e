//! Record types for storing data.

use crate::{Fields, RecordId, TableName, Timestamp, Value};
use serde::{Deserialize, Serialize};

/// Local sync state of a stored record.
///
/// Anything other than `Synced` is a pending local mutation that the change
/// journal will pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Matches what the remote last acknowledged or sent
    Synced,
    /// Created locally, never acknowledged by the remote
    Created,
    /// Known to the remote, modified locally since
    Updated,
    /// Soft-deleted locally, deletion not yet acknowledged
    Deleted,
}

impl SyncStatus {
    /// Whether the record has changes the remote has not seen.
    pub fn is_dirty(self) -> bool {
        self != SyncStatus::Synced
    }
}

/// A data record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Globally unique, assigned on the device that created the record
    pub id: RecordId,
    /// Table this record belongs to
    pub table: TableName,
    /// Column values
    #[serde(default)]
    pub fields: Fields,
    /// When the record was last written (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Soft delete flag (tombstone)
    #[serde(default)]
    pub deleted: bool,
}

impl Record {
    /// Create a new live record.
    pub fn new(
        id: RecordId,
        table: impl Into<TableName>,
        fields: Fields,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id,
            table: table.into(),
            fields,
            updated_at,
            deleted: false,
        }
    }

    /// Create a tombstone.
    pub fn tombstone(id: RecordId, table: impl Into<TableName>, updated_at: Timestamp) -> Self {
        Self {
            id,
            table: table.into(),
            fields: Fields::new(),
            updated_at,
            deleted: true,
        }
    }

    /// Check if record is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Look up a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    /// Turn this record into a tombstone.
    ///
    /// Fields are dropped to keep tombstones small; only the identity and the
    /// deletion time survive.
    pub fn mark_deleted(&mut self, timestamp: Timestamp) {
        self.deleted = true;
        self.fields.clear();
        self.updated_at = timestamp;
    }

    /// Replace the column values.
    pub fn update_fields(&mut self, fields: Fields, timestamp: Timestamp) {
        self.fields = fields;
        self.updated_at = timestamp;
    }
}
