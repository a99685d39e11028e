//! Change sets exchanged in one sync direction.

use crate::{error::Result, Error, Record, RecordId, TableName};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, HashSet};

/// Changes to a single table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableChanges {
    #[serde(default)]
    pub created: Vec<Record>,
    #[serde(default)]
    pub updated: Vec<Record>,
    #[serde(default)]
    pub deleted: Vec<RecordId>,
}

impl TableChanges {
    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Number of changed records.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Remove `id` from every bucket.
    fn evict(&mut self, id: &RecordId) {
        self.created.retain(|r| &r.id != id);
        self.updated.retain(|r| &r.id != id);
        self.deleted.retain(|d| d != id);
    }

    /// Check that no id shows up in two buckets.
    fn validate(&self, table: &str) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.len());
        let ids = self
            .created
            .iter()
            .map(|r| &r.id)
            .chain(self.updated.iter().map(|r| &r.id))
            .chain(self.deleted.iter());

        for id in ids {
            if !seen.insert(id) {
                return Err(Error::DuplicateChange {
                    table: table.to_string(),
                    id: *id,
                });
            }
        }
        Ok(())
    }
}

/// A batch of creates/updates/deletes grouped per table.
///
/// A record id appears in at most one bucket. The `push_*` methods keep that
/// invariant by moving an id to the bucket of the latest call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    tables: BTreeMap<TableName, TableChanges>,
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, table: &str) -> &mut TableChanges {
        self.tables.entry(table.to_string()).or_default()
    }

    /// Add a created record.
    pub fn push_created(&mut self, record: Record) {
        let changes = self.entry(&record.table);
        changes.evict(&record.id);
        changes.created.push(record);
    }

    /// Add an updated record.
    pub fn push_updated(&mut self, record: Record) {
        let changes = self.entry(&record.table);
        changes.evict(&record.id);
        changes.updated.push(record);
    }

    /// Add a deleted record id.
    pub fn push_deleted(&mut self, table: &str, id: RecordId) {
        let changes = self.entry(table);
        changes.evict(&id);
        changes.deleted.push(id);
    }

    /// Changes for one table.
    pub fn table(&self, table: &str) -> Option<&TableChanges> {
        self.tables.get(table)
    }

    /// Iterate over tables with their changes.
    pub fn tables(&self) -> impl Iterator<Item = (&TableName, &TableChanges)> {
        self.tables.iter()
    }

    /// Whether the change set carries nothing.
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableChanges::is_empty)
    }

    /// Total number of changed records.
    pub fn len(&self) -> usize {
        self.tables.values().map(TableChanges::len).sum()
    }

    /// Drop tables without changes.
    pub fn prune(&mut self) {
        self.tables.retain(|_, c| !c.is_empty());
    }

    /// Check the one-bucket-per-id invariant. Change sets built through the
    /// `push_*` methods always pass; deserialized ones may not.
    pub fn validate(&self) -> Result<()> {
        for (table, changes) in &self.tables {
            changes.validate(table)?;
            if let Some(stray) = changes
                .created
                .iter()
                .chain(changes.updated.iter())
                .find(|r| &r.table != table)
            {
                return Err(Error::MisfiledRecord {
                    table: table.clone(),
                    actual: stray.table.clone(),
                    id: stray.id,
                });
            }
        }
        Ok(())
    }

    /// Every `(table, id)` referenced by this change set.
    pub fn keys(&self) -> impl Iterator<Item = (&TableName, &RecordId)> {
        self.tables.iter().flat_map(|(table, c)| {
            c.created
                .iter()
                .map(|r| &r.id)
                .chain(c.updated.iter().map(|r| &r.id))
                .chain(c.deleted.iter())
                .map(move |id| (table, id))
        })
    }
}

impl IntoIterator for ChangeSet {
    type Item = (TableName, TableChanges);
    type IntoIter = btree_map::IntoIter<TableName, TableChanges>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}
