//! Schema migrations and version negotiation.
//!
//! Only additive steps are representable. Anything else the remote might
//! describe deserializes to [`MigrationStep::Unsupported`], which makes the
//! schemas incompatible and forces the client to update out of band.
//!
//! # Negotiation
//!
//! The remote keeps a [`MigrationCatalog`]. Given the schema version a client
//! reports, [`MigrationCatalog::negotiate`] returns the contiguous, ascending
//! chain of migrations that takes the client to the current version, or
//! `compatible = false` when no such chain exists.

use crate::{error::Result, ColumnSchema, Error, Schema, SchemaVersion, TableName, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One additive change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationStep {
    /// Create a new table
    AddTable(TableSchema),
    /// Add columns to an existing table
    AddColumns {
        table: TableName,
        columns: Vec<ColumnSchema>,
    },
    /// A step kind this engine cannot apply
    #[serde(other)]
    Unsupported,
}

impl MigrationStep {
    fn is_additive(&self) -> bool {
        !matches!(self, MigrationStep::Unsupported)
    }
}

/// Steps taking a schema from one version to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub from_version: SchemaVersion,
    pub to_version: SchemaVersion,
    pub operations: Vec<MigrationStep>,
}

impl Migration {
    /// Create a migration.
    pub fn new(
        from_version: SchemaVersion,
        to_version: SchemaVersion,
        operations: Vec<MigrationStep>,
    ) -> Self {
        Self {
            from_version,
            to_version,
            operations,
        }
    }

    /// Whether every step is additive.
    pub fn is_additive(&self) -> bool {
        self.operations.iter().all(MigrationStep::is_additive)
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidMigration {
            from: self.from_version,
            to: self.to_version,
            reason: reason.into(),
        }
    }

    /// Apply this migration to `schema`.
    ///
    /// The schema must be exactly at `from_version`. On error the schema is
    /// left untouched.
    pub fn apply_to(&self, schema: &mut Schema) -> Result<()> {
        if self.to_version <= self.from_version {
            return Err(self.invalid("target version must be higher"));
        }
        if schema.version != self.from_version {
            return Err(Error::SchemaVersionMismatch {
                expected: self.from_version,
                actual: schema.version,
            });
        }

        let mut next = schema.clone();
        for step in &self.operations {
            match step {
                MigrationStep::AddTable(table) => {
                    if next.tables.contains_key(&table.name) {
                        return Err(self.invalid(format!("table '{}' already exists", table.name)));
                    }
                    next.add_table(table.clone());
                }
                MigrationStep::AddColumns { table, columns } => {
                    let existing = next
                        .tables
                        .get_mut(table)
                        .ok_or_else(|| Error::TableNotFound(table.clone()))?;
                    for column in columns {
                        if existing.column(&column.name).is_some() {
                            return Err(self.invalid(format!(
                                "column '{}.{}' already exists",
                                table, column.name
                            )));
                        }
                        existing.columns.push(column.clone());
                    }
                }
                MigrationStep::Unsupported => {
                    return Err(self.invalid("non-additive step"));
                }
            }
        }

        next.version = self.to_version;
        *schema = next;
        Ok(())
    }
}

/// Outcome of [`MigrationCatalog::negotiate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    pub migrations: Vec<Migration>,
    pub compatible: bool,
}

impl Negotiation {
    fn compatible(migrations: Vec<Migration>) -> Self {
        Self {
            migrations,
            compatible: true,
        }
    }

    fn incompatible() -> Self {
        Self {
            migrations: Vec::new(),
            compatible: false,
        }
    }
}

/// The remote's view of its schema history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCatalog {
    /// Schema version the remote currently serves
    pub current_version: SchemaVersion,
    /// Known migrations
    #[serde(default)]
    pub migrations: Vec<Migration>,
    /// Versions introduced by a breaking change; clients older than one of
    /// these must update before syncing again
    #[serde(default)]
    pub breaking_versions: BTreeSet<SchemaVersion>,
}

impl MigrationCatalog {
    /// A catalog without history.
    pub fn new(current_version: SchemaVersion) -> Self {
        Self {
            current_version,
            migrations: Vec::new(),
            breaking_versions: BTreeSet::new(),
        }
    }

    /// Builder-style method to register a migration.
    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Builder-style method to mark a version as breaking.
    pub fn with_breaking_version(mut self, version: SchemaVersion) -> Self {
        self.breaking_versions.insert(version);
        self
    }

    /// Work out what a client at `local_version` needs to sync.
    pub fn negotiate(&self, local_version: SchemaVersion) -> Negotiation {
        if local_version == self.current_version {
            return Negotiation::compatible(Vec::new());
        }
        if local_version > self.current_version {
            return Negotiation::incompatible();
        }
        if self
            .breaking_versions
            .range(local_version + 1..=self.current_version)
            .next()
            .is_some()
        {
            return Negotiation::incompatible();
        }

        let by_from: BTreeMap<SchemaVersion, &Migration> = self
            .migrations
            .iter()
            .map(|m| (m.from_version, m))
            .collect();

        let mut chain = Vec::new();
        let mut version = local_version;
        while version < self.current_version {
            match by_from.get(&version) {
                Some(m) if m.is_additive() && m.to_version > version => {
                    chain.push((*m).clone());
                    version = m.to_version;
                }
                _ => return Negotiation::incompatible(),
            }
        }

        if version != self.current_version {
            return Negotiation::incompatible();
        }
        Negotiation::compatible(chain)
    }
}

/// Select, from migrations offered by the remote, the ones a schema at
/// `current` still has to apply, in order.
///
/// Migrations already covered by `current` are skipped so each one applies
/// exactly once. The remainder must form a contiguous additive chain.
pub fn pending_migrations(
    current: SchemaVersion,
    offered: &[Migration],
) -> Result<Vec<Migration>> {
    let mut pending: Vec<Migration> = offered
        .iter()
        .filter(|m| m.to_version > current)
        .cloned()
        .collect();
    pending.sort_by_key(|m| m.from_version);

    let mut version = current;
    for migration in &pending {
        if migration.from_version != version {
            return Err(migration.invalid(format!("chain broken at version {version}")));
        }
        if !migration.is_additive() {
            return Err(migration.invalid("non-additive step"));
        }
        version = migration.to_version;
    }

    Ok(pending)
}

/// Columns added to one existing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedColumns {
    pub table: TableName,
    pub columns: Vec<String>,
}

/// What changed in the local schema since the last sync, reported to the
/// remote with a pull so it can send full contents of the new tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSyncChanges {
    pub from: SchemaVersion,
    pub tables: Vec<TableName>,
    pub columns: Vec<AddedColumns>,
}

impl MigrationSyncChanges {
    /// Summarize `history` between `from` and `to`.
    ///
    /// Returns `None` when the history does not cover the whole range, in
    /// which case the caller cannot describe the change and must fall back
    /// to a full pull.
    pub fn between(history: &[Migration], from: SchemaVersion, to: SchemaVersion) -> Option<Self> {
        let mut tables = Vec::new();
        let mut columns: BTreeMap<TableName, Vec<String>> = BTreeMap::new();
        let mut version = from;

        while version < to {
            let migration = history.iter().find(|m| m.from_version == version)?;
            for step in &migration.operations {
                match step {
                    MigrationStep::AddTable(table) => tables.push(table.name.clone()),
                    MigrationStep::AddColumns { table, columns: added } => columns
                        .entry(table.clone())
                        .or_default()
                        .extend(added.iter().map(|c| c.name.clone())),
                    MigrationStep::Unsupported => return None,
                }
            }
            version = migration.to_version;
        }

        if version != to {
            return None;
        }

        // columns of brand new tables are covered by the table itself
        columns.retain(|table, _| !tables.contains(table));

        Some(Self {
            from,
            tables,
            columns: columns
                .into_iter()
                .map(|(table, columns)| AddedColumns { table, columns })
                .collect(),
        })
    }

    /// Tables whose full contents the remote should send.
    pub fn affected_tables(&self) -> impl Iterator<Item = &TableName> {
        self.tables.iter().chain(self.columns.iter().map(|c| &c.table))
    }
}
