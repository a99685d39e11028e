//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory Store and persistent storage.
//! They are designed for deterministic serialization to ensure consistency.

use crate::{
    error::Result, store::Row, Error, HybridClock, Migration, RecordId, Schema, SchemaVersion,
    SyncStatus, TableName,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the store state.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
/// The schema travels with the data since migrations change it at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema at time of snapshot
    pub schema: Schema,
    /// Clock state
    pub clock: HybridClock,
    /// All rows organized by table, then by record ID
    pub tables: BTreeMap<TableName, BTreeMap<RecordId, Row>>,
    /// Migrations applied to the store
    #[serde(default)]
    pub history: Vec<Migration>,
    /// How many of those migrations came from the remote
    #[serde(default)]
    pub pulled_migrations: u64,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema: Schema) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema,
            clock: HybridClock::new(),
            tables: BTreeMap::new(),
            history: Vec::new(),
            pulled_migrations: 0,
        }
    }

    /// Add a row to the snapshot.
    pub fn add_row(&mut self, row: Row) {
        self.tables
            .entry(row.record.table.clone())
            .or_default()
            .insert(row.record.id, row);
    }

    /// Get a row from the snapshot.
    pub fn get_row(&self, table: &str, id: &RecordId) -> Option<&Row> {
        self.tables.get(table)?.get(id)
    }

    /// Count total records across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    /// Count records not yet acknowledged by the remote.
    pub fn pending_count(&self) -> usize {
        self.tables
            .values()
            .flat_map(|t| t.values())
            .filter(|row| row.status.is_dirty())
            .count()
    }

    /// Check the snapshot is internally consistent.
    pub fn validate(&self) -> Result<()> {
        for (table, rows) in &self.tables {
            if self.schema.get_table(table).is_none() {
                return Err(Error::TableNotFound(table.clone()));
            }

            for (id, row) in rows {
                if &row.record.table != table || &row.record.id != id {
                    return Err(Error::InvalidSnapshot(format!(
                        "row {}/{} filed under {table}/{id}",
                        row.record.table, row.record.id
                    )));
                }

                let deleted_status = row.status == SyncStatus::Deleted;
                if deleted_status && !row.record.deleted {
                    return Err(Error::InvalidSnapshot(format!(
                        "live record {table}/{id} marked deleted"
                    )));
                }
                if row.record.deleted && !deleted_status && row.status != SyncStatus::Synced {
                    return Err(Error::InvalidSnapshot(format!(
                        "tombstone {table}/{id} has status {:?}",
                        row.status
                    )));
                }
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub schema_version: SchemaVersion,
    /// Highest timestamp the store issued or observed
    pub clock: u64,
    pub record_count: usize,
    pub pending_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            schema_version: snapshot.schema.version,
            clock: snapshot.clock.last(),
            record_count: snapshot.record_count(),
            pending_count: snapshot.pending_count(),
        }
    }
}
