//! Change journal: the outbound delta of a store.
//!
//! There is no write-ahead log. Every local write leaves the record with a
//! dirty [`SyncStatus`] and an `updated_at` stamped by the hybrid clock, which
//! is always later than any watermark the store has seen. The journal
//! therefore collects, per table, the dirty records with
//! `updated_at > since`.
//!
//! Small tables are scanned linearly. Tables above
//! [`Journal::full_scan_threshold`] are range-scanned through the
//! `(updated_at, id)` index, so the cost follows the number of records
//! modified since the watermark rather than the table size.

use crate::{store::Row, ChangeSet, RecordId, Store, SyncStatus, Table, TableName, Timestamp};
use std::collections::HashSet;

/// Default row count up to which a table is scanned linearly.
pub const DEFAULT_FULL_SCAN_THRESHOLD: usize = 1_000;

/// How a table is read by the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Visit every row
    Full,
    /// Range scan over the `updated_at` index
    Index,
}

/// Collects pending local mutations from a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Journal {
    full_scan_threshold: usize,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(DEFAULT_FULL_SCAN_THRESHOLD)
    }
}

impl Journal {
    /// Create a journal with the given linear scan threshold.
    pub fn new(full_scan_threshold: usize) -> Self {
        Self {
            full_scan_threshold,
        }
    }

    /// Row count up to which tables are scanned linearly.
    pub fn full_scan_threshold(&self) -> usize {
        self.full_scan_threshold
    }

    /// How `table` would be read for a collection since `since`.
    pub fn scan_mode(&self, table: &Table, since: Option<Timestamp>) -> ScanMode {
        match since {
            Some(_) if table.len() > self.full_scan_threshold => ScanMode::Index,
            _ => ScanMode::Full,
        }
    }

    /// Pending local mutations with `updated_at > since`. `None` means the
    /// store never synced and everything dirty is collected.
    pub fn collect(&self, store: &Store, since: Option<Timestamp>) -> ChangeSet {
        self.collect_excluding(store, since, &HashSet::new())
    }

    /// Like [`collect`](Self::collect), skipping the records in `exclude`.
    pub fn collect_excluding(
        &self,
        store: &Store,
        since: Option<Timestamp>,
        exclude: &HashSet<(TableName, RecordId)>,
    ) -> ChangeSet {
        let mut changes = ChangeSet::new();

        for (name, table) in store.tables() {
            let mut rows: Vec<&Row> = match (self.scan_mode(table, since), since) {
                (ScanMode::Index, Some(since)) => table.modified_since(since).collect(),
                (_, since) => table
                    .rows()
                    .filter(|row| since.map_or(true, |s| row.record.updated_at > s))
                    .collect(),
            };

            rows.retain(|row| {
                row.status.is_dirty() && !exclude.contains(&(name.clone(), row.record.id))
            });
            rows.sort_by_key(|row| (row.record.updated_at, row.record.id));

            for row in rows {
                match row.status {
                    SyncStatus::Created => changes.push_created(row.record.clone()),
                    SyncStatus::Updated => changes.push_updated(row.record.clone()),
                    SyncStatus::Deleted => changes.push_deleted(name, row.record.id),
                    SyncStatus::Synced => {}
                }
            }
        }

        changes
    }
}
