//! Store - the in-memory state container.
//!
//! The Store holds every record of every table along with its local sync
//! status. Local writes go through [`Store::upsert`] and
//! [`Store::soft_delete`]; remote changes come in through
//! [`Store::merge_pulled`], which runs the conflict resolver for each record.

use crate::{
    error::Result,
    migration::{Migration, MigrationSyncChanges},
    resolve::{resolve, Conflict, ConflictResolution, Resolution},
    ChangeSet, Error, Fields, HybridClock, Record, RecordId, Schema, SchemaVersion, SyncStatus,
    TableName, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A stored record together with its sync status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub record: Record,
    pub status: SyncStatus,
    /// Last version known to the remote, kept while the row is dirty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Record>,
}

impl Row {
    fn synced(record: Record) -> Self {
        Self {
            record,
            status: SyncStatus::Synced,
            base: None,
        }
    }

    /// Status and base for a local write on top of this row.
    fn dirty(&self, status: SyncStatus) -> (SyncStatus, Option<Record>) {
        match self.status {
            SyncStatus::Synced => (status, Some(self.record.clone())),
            SyncStatus::Created if status == SyncStatus::Updated => {
                (SyncStatus::Created, self.base.clone())
            }
            _ => (status, self.base.clone()),
        }
    }

    /// The version both sides last agreed on.
    fn common_base(&self) -> Option<&Record> {
        match self.status {
            SyncStatus::Synced => Some(&self.record),
            _ => self.base.as_ref(),
        }
    }
}

/// All rows of one table.
///
/// Besides the primary map the table keeps a secondary index ordered by
/// `(updated_at, id)`, so records modified after a point in time can be
/// found without touching the rest.
#[derive(Debug, Clone, Default)]
pub struct Table {
    rows: HashMap<RecordId, Row>,
    by_updated_at: BTreeSet<(Timestamp, RecordId)>,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a row by ID, tombstones included.
    pub fn get(&self, id: &RecordId) -> Option<&Row> {
        self.rows.get(id)
    }

    /// Insert or replace a row, keeping the index in step.
    fn put(&mut self, row: Row) {
        let key = (row.record.updated_at, row.record.id);
        if let Some(old) = self.rows.insert(row.record.id, row) {
            self.by_updated_at
                .remove(&(old.record.updated_at, old.record.id));
        }
        self.by_updated_at.insert(key);
    }

    /// Every row, tombstones included, in no particular order.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    /// Rows with `updated_at > since`, in `(updated_at, id)` order, found
    /// through the index.
    pub fn modified_since(&self, since: Timestamp) -> impl Iterator<Item = &Row> + '_ {
        since
            .checked_add(1)
            .map(|from| self.by_updated_at.range((from, RecordId::nil())..))
            .into_iter()
            .flatten()
            .filter_map(move |(_, id)| self.rows.get(id))
    }

    /// Number of rows, tombstones included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of live rows.
    pub fn live_count(&self) -> usize {
        self.rows.values().filter(|r| r.record.is_active()).count()
    }
}

/// What a merge did to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Remote records written to the store
    pub applied: usize,
    /// Local records kept over the remote version, pushed next cycle
    pub requeued: usize,
    /// Records changed on both sides, with the decision taken
    pub conflicts: Vec<Conflict>,
    /// Every `(table, id)` touched by the merge
    pub reconciled: HashSet<(TableName, RecordId)>,
}

/// The main store holding all state.
#[derive(Debug, Clone)]
pub struct Store {
    /// Schema for validation, changed only by migrations
    schema: Schema,
    /// Clock stamping local writes
    clock: HybridClock,
    /// Tables by name
    tables: BTreeMap<TableName, Table>,
    /// Migrations applied to this store, in order
    history: Vec<Migration>,
    /// How many of them came from the remote
    pulled_migrations: u64,
}

impl Store {
    /// Create an empty store with the given schema.
    pub fn new(schema: Schema) -> Self {
        let tables = schema
            .tables
            .keys()
            .map(|name| (name.clone(), Table::new()))
            .collect();

        Self {
            schema,
            clock: HybridClock::new(),
            tables,
            history: Vec::new(),
            pulled_migrations: 0,
        }
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Current schema version.
    pub fn schema_version(&self) -> SchemaVersion {
        self.schema.version
    }

    /// Get the clock.
    pub fn clock(&self) -> &HybridClock {
        &self.clock
    }

    /// Migrations applied so far.
    pub fn history(&self) -> &[Migration] {
        &self.history
    }

    /// Number of migrations taken from the remote over the store's lifetime.
    pub fn pulled_migrations(&self) -> u64 {
        self.pulled_migrations
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Iterate over tables.
    pub fn tables(&self) -> impl Iterator<Item = (&TableName, &Table)> {
        self.tables.iter()
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Get a live record.
    pub fn get(&self, table: &str, id: &RecordId) -> Option<&Record> {
        self.get_including_deleted(table, id)
            .filter(|r| r.is_active())
    }

    /// Get a record including tombstones.
    pub fn get_including_deleted(&self, table: &str, id: &RecordId) -> Option<&Record> {
        self.tables
            .get(table)
            .and_then(|t| t.get(id))
            .map(|row| &row.record)
    }

    /// Sync status of a record.
    pub fn status(&self, table: &str, id: &RecordId) -> Option<SyncStatus> {
        self.tables
            .get(table)
            .and_then(|t| t.get(id))
            .map(|row| row.status)
    }

    /// Live records of `table` matching `predicate`.
    pub fn scan<'a, P>(
        &'a self,
        table: &str,
        predicate: P,
    ) -> Result<impl Iterator<Item = &'a Record> + 'a>
    where
        P: Fn(&Record) -> bool + 'a,
    {
        let table = self
            .tables
            .get(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

        Ok(table
            .rows()
            .map(|row| &row.record)
            .filter(move |r| r.is_active() && predicate(*r)))
    }

    /// Create or replace the fields of a record.
    ///
    /// The fields are validated against the table schema and the record is
    /// stamped with the hybrid clock. Writing to a tombstone is rejected.
    pub fn upsert(
        &mut self,
        table: &str,
        id: RecordId,
        fields: Fields,
        now: Timestamp,
    ) -> Result<&Record> {
        let fields = {
            let schema = self.schema.table(table)?;
            schema.validate_fields(&fields)?;
            schema.coerce(fields)
        };

        let (status, base) = match self.tables.get(table).and_then(|t| t.get(&id)) {
            Some(row) if row.record.deleted => {
                return Err(Error::OperationOnDeleted {
                    table: table.to_string(),
                    id,
                })
            }
            Some(row) => row.dirty(SyncStatus::Updated),
            None => (SyncStatus::Created, None),
        };

        let stamp = self.clock.stamp(now);
        let row = Row {
            record: Record::new(id, table, fields, stamp),
            status,
            base,
        };

        let table = self.table_mut(table)?;
        table.put(row);
        Ok(&table.rows[&id].record)
    }

    /// Turn a live record into a tombstone.
    pub fn soft_delete(&mut self, table: &str, id: RecordId, now: Timestamp) -> Result<()> {
        let mut row = match self.tables.get(table).and_then(|t| t.get(&id)) {
            Some(row) if row.record.deleted => {
                return Err(Error::OperationOnDeleted {
                    table: table.to_string(),
                    id,
                })
            }
            Some(row) => row.clone(),
            None if self.tables.contains_key(table) => {
                return Err(Error::RecordNotFound {
                    table: table.to_string(),
                    id,
                })
            }
            None => return Err(Error::TableNotFound(table.to_string())),
        };

        (row.status, row.base) = row.dirty(SyncStatus::Deleted);
        row.record.mark_deleted(self.clock.stamp(now));
        self.table_mut(table)?.put(row);
        Ok(())
    }

    /// Merge a pulled change set stamped by the remote at `timestamp`.
    ///
    /// The whole batch is checked before anything is written, so the store
    /// either takes every record or none. Pulled deletions become tombstones
    /// stamped `timestamp`. Local records kept over the remote version are
    /// restamped past `timestamp` so the journal picks them up next cycle.
    pub fn merge_pulled(
        &mut self,
        changes: ChangeSet,
        timestamp: Timestamp,
        now: Timestamp,
    ) -> Result<MergeReport> {
        changes.validate()?;
        for (table, _) in changes.tables() {
            self.schema.table(table)?;
        }

        self.clock.observe(timestamp);
        let mut report = MergeReport::default();

        for (name, table_changes) in changes {
            let remote: Vec<Record> = table_changes
                .created
                .into_iter()
                .chain(table_changes.updated)
                .chain(
                    table_changes
                        .deleted
                        .into_iter()
                        .map(|id| Record::tombstone(id, name.as_str(), timestamp)),
                )
                .collect();

            for mut record in remote {
                if let Some(schema) = self.schema.get_table(&name) {
                    record.fields = schema.coerce(std::mem::take(&mut record.fields));
                }
                self.clock.observe(record.updated_at);
                self.merge_one(record, now, &mut report);
            }
        }

        Ok(report)
    }

    fn merge_one(&mut self, remote: Record, now: Timestamp, report: &mut MergeReport) {
        let table_name = remote.table.clone();
        let id = remote.id;
        let table = self.tables.entry(table_name.clone()).or_default();
        let existing = table.get(&id);

        let base = existing.and_then(Row::common_base);
        let local = existing.map(|row| &row.record);
        let local_status = existing.map(|row| row.status);

        let resolution = resolve(base, local, &remote);
        if let (Some(resolution), Some(local)) = (resolution.conflict(), local) {
            report.conflicts.push(Conflict {
                table: table_name.clone(),
                id,
                local_updated_at: local.updated_at,
                remote_updated_at: remote.updated_at,
                resolution,
            });
        }

        let row = match resolution {
            Resolution::Local(mut record)
            | Resolution::Conflict {
                winner: mut record,
                resolution: ConflictResolution::LocalWins,
            } => {
                record.updated_at = self.clock.stamp(now);
                report.requeued += 1;
                Row {
                    record,
                    status: local_status.unwrap_or(SyncStatus::Updated),
                    base: Some(remote),
                }
            }
            other => {
                report.applied += 1;
                Row::synced(other.into_record())
            }
        };

        table.put(row);
        report.reconciled.insert((table_name, id));
    }

    /// Mark pushed records as synced.
    ///
    /// A record only flips to synced if it still carries the `updated_at` it
    /// was pushed with; anything written since stays dirty. When the remote
    /// reported the time it accepted the push, synced records take that
    /// stamp and dirty ones remember the pushed version as their base.
    /// Returns the number of records marked.
    pub fn mark_synced(&mut self, pushed: &ChangeSet, accepted_at: Option<Timestamp>) -> usize {
        if let Some(at) = accepted_at {
            self.clock.observe(at);
        }
        let mut marked = 0;

        for (name, changes) in pushed.tables() {
            let Some(table) = self.tables.get_mut(name) else {
                continue;
            };

            let upserts = changes
                .created
                .iter()
                .chain(changes.updated.iter())
                .map(|r| (r.id, Some(r)));
            let deletes = changes.deleted.iter().map(|id| (*id, None));

            for (id, pushed_record) in upserts.chain(deletes) {
                let Some(mut row) = table.get(&id).filter(|r| r.status.is_dirty()).cloned() else {
                    continue;
                };
                let unchanged = match pushed_record {
                    Some(r) => !row.record.deleted && row.record.updated_at == r.updated_at,
                    None => row.record.deleted,
                };

                if unchanged {
                    row.status = SyncStatus::Synced;
                    row.base = None;
                    if let Some(at) = accepted_at {
                        row.record.updated_at = at;
                    }
                    marked += 1;
                } else if let Some(at) = accepted_at {
                    let mut base = match pushed_record {
                        Some(r) => r.clone(),
                        None => Record::tombstone(id, name.as_str(), at),
                    };
                    base.updated_at = at;
                    row.base = Some(base);
                    if row.status == SyncStatus::Created {
                        row.status = SyncStatus::Updated;
                    }
                } else {
                    continue;
                }

                table.put(row);
            }
        }

        marked
    }

    /// Apply a migration to the schema, creating new tables.
    pub fn apply_migration(&mut self, migration: &Migration) -> Result<()> {
        self.install(std::slice::from_ref(migration))
    }

    /// Apply a chain of migrations sent by the remote.
    ///
    /// All or nothing: if any migration fails the schema is left as it was.
    pub fn apply_pulled_migrations(&mut self, migrations: &[Migration]) -> Result<()> {
        self.install(migrations)?;
        self.pulled_migrations += migrations.len() as u64;
        Ok(())
    }

    fn install(&mut self, migrations: &[Migration]) -> Result<()> {
        let mut schema = self.schema.clone();
        for migration in migrations {
            migration.apply_to(&mut schema)?;
        }

        self.schema = schema;
        for name in self.schema.tables.keys() {
            if !self.tables.contains_key(name) {
                self.tables.insert(name.clone(), Table::new());
            }
        }
        self.history.extend_from_slice(migrations);
        Ok(())
    }

    /// Describe schema changes made since version `from`, if the migration
    /// history covers them.
    pub fn migration_changes_since(&self, from: SchemaVersion) -> Option<MigrationSyncChanges> {
        MigrationSyncChanges::between(&self.history, from, self.schema.version)
    }

    /// Export the current store state as a snapshot.
    pub fn export_snapshot(&self) -> crate::snapshot::StoreSnapshot {
        let mut snapshot = crate::snapshot::StoreSnapshot::new(self.schema.clone());
        snapshot.clock = self.clock;
        snapshot.history = self.history.clone();
        snapshot.pulled_migrations = self.pulled_migrations;

        for table in self.tables.values() {
            for row in table.rows() {
                snapshot.add_row(row.clone());
            }
        }

        snapshot
    }

    /// Rebuild a store from a snapshot.
    pub fn from_snapshot(snapshot: crate::snapshot::StoreSnapshot) -> Result<Self> {
        snapshot.validate()?;

        let mut store = Self::new(snapshot.schema);
        store.clock = snapshot.clock;
        store.history = snapshot.history;
        store.pulled_migrations = snapshot.pulled_migrations;

        for (name, rows) in snapshot.tables {
            // JSON has no timestamp type; restore it from the schema
            let schema = store.schema.table(&name)?.clone();
            let table = store.table_mut(&name)?;
            for (_, mut row) in rows {
                for record in std::iter::once(&mut row.record).chain(row.base.as_mut()) {
                    record.fields = schema.coerce(std::mem::take(&mut record.fields));
                }
                table.put(row);
            }
        }

        let latest = store
            .tables
            .values()
            .filter_map(|t| t.by_updated_at.last())
            .map(|(updated_at, _)| *updated_at)
            .max();
        if let Some(latest) = latest {
            store.clock.observe(latest);
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fields, ColumnSchema, ColumnType, MigrationStep, TableSchema, Value};
    use uuid::Uuid;

    fn test_schema() -> Schema {
        Schema::new(1)
            .with_table(TableSchema::new(
                "clients",
                vec![
                    ColumnSchema::required("name", ColumnType::String),
                    ColumnSchema::optional("phone", ColumnType::String),
                ],
            ))
            .with_table(TableSchema::new(
                "orders",
                vec![
                    ColumnSchema::required("name", ColumnType::String),
                    ColumnSchema::required("date", ColumnType::Timestamp),
                ],
            ))
    }

    fn test_store() -> Store {
        Store::new(test_schema())
    }

    fn id(n: u128) -> RecordId {
        Uuid::from_u128(n)
    }

    #[test]
    fn upsert_creates_record() {
        let mut store = test_store();
        let record = store
            .upsert("clients", id(1), fields([("name", "Alice")]), 1000)
            .unwrap();

        assert_eq!(record.updated_at, 1000);
        assert_eq!(store.status("clients", &id(1)), Some(SyncStatus::Created));
        assert_eq!(
            store.get("clients", &id(1)).unwrap().get("name"),
            Some(&Value::from("Alice"))
        );
    }

    #[test]
    fn upsert_unknown_table() {
        let mut store = test_store();
        let result = store.upsert("posts", id(1), fields([("name", "A")]), 1000);
        assert!(matches!(result, Err(Error::TableNotFound(_))));
    }

    #[test]
    fn upsert_validates_fields() {
        let mut store = test_store();
        let result = store.upsert("clients", id(1), fields([("phone", "123")]), 1000);

        assert!(matches!(result, Err(Error::MissingRequiredColumn(_))));
        assert!(store.get_including_deleted("clients", &id(1)).is_none());
    }

    #[test]
    fn upsert_stamps_monotonically() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "A")]), 1000)
            .unwrap();
        // wall clock went backwards
        let record = store
            .upsert("clients", id(1), fields([("name", "B")]), 900)
            .unwrap();

        assert_eq!(record.updated_at, 1001);
    }

    #[test]
    fn created_stays_created_until_synced() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "A")]), 1000)
            .unwrap();
        store
            .upsert("clients", id(1), fields([("name", "B")]), 2000)
            .unwrap();

        assert_eq!(store.status("clients", &id(1)), Some(SyncStatus::Created));
    }

    #[test]
    fn synced_record_becomes_updated() {
        let mut store = test_store();
        let mut changes = ChangeSet::new();
        changes.push_created(Record::new(id(1), "clients", fields([("name", "A")]), 50));
        store.merge_pulled(changes, 100, 100).unwrap();

        store
            .upsert("clients", id(1), fields([("name", "B")]), 200)
            .unwrap();
        assert_eq!(store.status("clients", &id(1)), Some(SyncStatus::Updated));
    }

    #[test]
    fn soft_delete_keeps_tombstone() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "A")]), 1000)
            .unwrap();
        store.soft_delete("clients", id(1), 2000).unwrap();

        assert!(store.get("clients", &id(1)).is_none());
        let tombstone = store.get_including_deleted("clients", &id(1)).unwrap();
        assert!(tombstone.deleted);
        assert!(tombstone.fields.is_empty());
        assert_eq!(tombstone.updated_at, 2000);
        assert_eq!(store.status("clients", &id(1)), Some(SyncStatus::Deleted));

        let table = store.table("clients").unwrap();
        assert_eq!((table.len(), table.live_count()), (1, 0));
    }

    #[test]
    fn operations_on_tombstone_rejected() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "A")]), 1000)
            .unwrap();
        store.soft_delete("clients", id(1), 2000).unwrap();

        assert!(matches!(
            store.upsert("clients", id(1), fields([("name", "B")]), 3000),
            Err(Error::OperationOnDeleted { .. })
        ));
        assert!(matches!(
            store.soft_delete("clients", id(1), 3000),
            Err(Error::OperationOnDeleted { .. })
        ));
    }

    #[test]
    fn soft_delete_missing_record() {
        let mut store = test_store();
        assert!(matches!(
            store.soft_delete("clients", id(9), 1000),
            Err(Error::RecordNotFound { .. })
        ));
        assert!(matches!(
            store.soft_delete("posts", id(9), 1000),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn scan_filters_live_records() {
        let mut store = test_store();
        for (n, name) in [(1, "Ann"), (2, "Bob"), (3, "Abe")] {
            store
                .upsert("clients", id(n), fields([("name", name)]), 1000)
                .unwrap();
        }
        store.soft_delete("clients", id(3), 2000).unwrap();

        let found: Vec<_> = store
            .scan("clients", |r| {
                r.get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|n| n.starts_with('A'))
            })
            .unwrap()
            .map(|r| r.id)
            .collect();

        assert_eq!(found, vec![id(1)]);
    }

    #[test]
    fn index_follows_updates() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "A")]), 100)
            .unwrap();
        store
            .upsert("clients", id(2), fields([("name", "B")]), 200)
            .unwrap();
        store
            .upsert("clients", id(1), fields([("name", "C")]), 300)
            .unwrap();

        let table = store.table("clients").unwrap();
        let since: Vec<_> = table.modified_since(150).map(|r| r.record.id).collect();
        assert_eq!(since, vec![id(2), id(1)]);
        assert_eq!(table.modified_since(300).count(), 0);
        assert_eq!(table.modified_since(u64::MAX).count(), 0);
    }

    #[test]
    fn merge_applies_remote_records() {
        let mut store = test_store();
        let mut changes = ChangeSet::new();
        changes.push_created(Record::new(
            id(1),
            "orders",
            fields([("name", Value::from("O1")), ("date", Value::Number(1700.0))]),
            120,
        ));

        let report = store.merge_pulled(changes, 150, 10).unwrap();

        assert_eq!(report.applied, 1);
        assert!(report.conflicts.is_empty());
        let order = store.get("orders", &id(1)).unwrap();
        assert_eq!(order.get("date"), Some(&Value::Timestamp(1700)));
        assert_eq!(store.status("orders", &id(1)), Some(SyncStatus::Synced));
        assert_eq!(store.clock().last(), 150);
    }

    #[test]
    fn merge_deleted_ids_become_tombstones() {
        let mut store = test_store();
        let mut changes = ChangeSet::new();
        changes.push_created(Record::new(id(1), "clients", fields([("name", "A")]), 50));
        store.merge_pulled(changes, 100, 100).unwrap();

        let mut changes = ChangeSet::new();
        changes.push_deleted("clients", id(1));
        store.merge_pulled(changes, 200, 100).unwrap();

        let tombstone = store.get_including_deleted("clients", &id(1)).unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.updated_at, 200);
    }

    #[test]
    fn merge_later_local_wins_and_is_requeued() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "Local")]), 300)
            .unwrap();

        let mut changes = ChangeSet::new();
        changes.push_updated(Record::new(id(1), "clients", fields([("name", "Remote")]), 200));
        let report = store.merge_pulled(changes, 400, 300).unwrap();

        assert_eq!(report.requeued, 1);
        assert_eq!(report.conflicts.len(), 1);
        let record = store.get("clients", &id(1)).unwrap();
        assert_eq!(record.get("name"), Some(&Value::from("Local")));
        assert!(record.updated_at > 400);
        assert!(store.status("clients", &id(1)).unwrap().is_dirty());
    }

    #[test]
    fn merge_is_all_or_nothing() {
        let mut store = test_store();
        let mut changes = ChangeSet::new();
        changes.push_created(Record::new(id(1), "clients", fields([("name", "A")]), 50));
        changes.push_created(Record::new(id(2), "posts", fields([("title", "x")]), 50));

        let result = store.merge_pulled(changes, 100, 100);

        assert!(matches!(result, Err(Error::TableNotFound(t)) if t == "posts"));
        assert!(store.get("clients", &id(1)).is_none());
        assert_eq!(store.clock().last(), 0);
    }

    #[test]
    fn mark_synced_skips_records_written_since() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "A")]), 100)
            .unwrap();
        store
            .upsert("clients", id(2), fields([("name", "B")]), 100)
            .unwrap();
        store.soft_delete("clients", id(2), 150).unwrap();

        let mut pushed = ChangeSet::new();
        pushed.push_created(store.get("clients", &id(1)).unwrap().clone());
        pushed.push_deleted("clients", id(2));

        // written again while the push was in flight
        store
            .upsert("clients", id(1), fields([("name", "A2")]), 200)
            .unwrap();

        assert_eq!(store.mark_synced(&pushed, None), 1);
        assert_eq!(store.status("clients", &id(1)), Some(SyncStatus::Created));
        assert_eq!(store.status("clients", &id(2)), Some(SyncStatus::Synced));
    }

    #[test]
    fn accepted_push_takes_remote_stamp() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "A")]), 100)
            .unwrap();
        let mut pushed = ChangeSet::new();
        pushed.push_created(store.get("clients", &id(1)).unwrap().clone());

        // remote clock far ahead of the device
        assert_eq!(store.mark_synced(&pushed, Some(5000)), 1);
        assert_eq!(store.get("clients", &id(1)).unwrap().updated_at, 5000);

        let record = store
            .upsert("clients", id(1), fields([("name", "B")]), 200)
            .unwrap();
        assert_eq!(record.updated_at, 5001);

        // the next pull echoes the pushed version back
        let mut echo = ChangeSet::new();
        echo.push_created(Record::new(id(1), "clients", fields([("name", "A")]), 5000));
        let report = store.merge_pulled(echo, 6000, 300).unwrap();

        assert!(report.conflicts.is_empty());
        assert_eq!(report.requeued, 1);
        let record = store.get("clients", &id(1)).unwrap();
        assert_eq!(record.get("name"), Some(&Value::from("B")));
        assert!(record.updated_at > 6000);
    }

    #[test]
    fn write_during_push_keeps_pushed_version_as_base() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "A")]), 100)
            .unwrap();
        let mut pushed = ChangeSet::new();
        pushed.push_created(store.get("clients", &id(1)).unwrap().clone());
        store
            .upsert("clients", id(1), fields([("name", "B")]), 200)
            .unwrap();

        assert_eq!(store.mark_synced(&pushed, Some(150)), 0);
        assert_eq!(store.status("clients", &id(1)), Some(SyncStatus::Updated));

        let mut echo = ChangeSet::new();
        echo.push_created(Record::new(id(1), "clients", fields([("name", "A")]), 150));
        let report = store.merge_pulled(echo, 300, 300).unwrap();

        assert!(report.conflicts.is_empty());
        assert_eq!(
            store.get("clients", &id(1)).unwrap().get("name"),
            Some(&Value::from("B"))
        );
    }

    #[test]
    fn migration_adds_table_and_history() {
        let mut store = test_store();
        let migration = Migration::new(
            1,
            2,
            vec![MigrationStep::AddTable(TableSchema::new(
                "notes",
                vec![ColumnSchema::required("body", ColumnType::String)],
            ))],
        );

        store.apply_migration(&migration).unwrap();

        assert_eq!(store.schema_version(), 2);
        assert!(store.table("notes").is_some());
        store
            .upsert("notes", id(1), fields([("body", "hello")]), 10)
            .unwrap();

        let changes = store.migration_changes_since(1).unwrap();
        assert_eq!(changes.tables, vec!["notes".to_string()]);
        assert!(store.migration_changes_since(0).is_none());
    }

    #[test]
    fn pulled_migrations_apply_all_or_nothing() {
        let mut store = test_store();
        let add_notes = Migration::new(
            1,
            2,
            vec![MigrationStep::AddTable(TableSchema::new(
                "notes",
                vec![ColumnSchema::required("body", ColumnType::String)],
            ))],
        );
        let add_clients_again = Migration::new(
            2,
            3,
            vec![MigrationStep::AddTable(TableSchema::new("clients", vec![]))],
        );

        let result = store.apply_pulled_migrations(&[add_notes.clone(), add_clients_again]);

        assert!(matches!(result, Err(Error::InvalidMigration { .. })));
        assert_eq!(store.schema_version(), 1);
        assert!(store.table("notes").is_none());
        assert!(store.history().is_empty());
        assert_eq!(store.pulled_migrations(), 0);

        store.apply_pulled_migrations(&[add_notes]).unwrap();
        assert_eq!(store.schema_version(), 2);
        assert_eq!(store.pulled_migrations(), 1);

        let restored = Store::from_snapshot(store.export_snapshot()).unwrap();
        assert_eq!(restored.pulled_migrations(), 1);
    }

    #[test]
    fn snapshot_roundtrip_rebuilds_index() {
        let mut store = test_store();
        store
            .upsert("clients", id(1), fields([("name", "A")]), 100)
            .unwrap();
        store
            .upsert("clients", id(2), fields([("name", "B")]), 200)
            .unwrap();
        store.soft_delete("clients", id(1), 300).unwrap();

        let restored = Store::from_snapshot(store.export_snapshot()).unwrap();

        assert_eq!(restored.clock().last(), 300);
        assert_eq!(restored.status("clients", &id(1)), Some(SyncStatus::Deleted));
        let since: Vec<_> = restored
            .table("clients")
            .unwrap()
            .modified_since(150)
            .map(|r| r.record.id)
            .collect();
        assert_eq!(since, vec![id(2), id(1)]);
    }
}
