//! Rules of the remote authority.
//!
//! The authority owns the canonical copy of every record and the clock that
//! stamps watermarks. The rules live here, free of IO, so every backend
//! applies them the same way: [`plan_push`] decides what a push does given
//! the currently stored records, and [`Accepted::add_to`] decides how a
//! stored record shows up in a pull. [`Authority`] is a complete in-memory
//! authority built on them.
//!
//! # Idempotency
//!
//! Each stored record remembers the client `updated_at` it was accepted with.
//! A record pushed again with the same stamp, or a deletion of a record that
//! is already a tombstone, is acknowledged without being applied twice. A
//! push retried after a lost response therefore succeeds and changes nothing.

use crate::{
    error::Result,
    migration::MigrationCatalog,
    protocol::{PullRequest, PullResponse, PushOutcome, RejectedRecord},
    ChangeSet, HybridClock, Record, RecordId, TableName, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A record as stored by the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accepted {
    /// Canonical record; `updated_at` is the authority's stamp
    pub record: Record,
    /// `updated_at` the client pushed it with
    pub client_updated_at: Timestamp,
    /// Authority stamp of the first acceptance
    pub created_at: Timestamp,
}

impl Accepted {
    /// Add this record to a pull response for a client that last pulled at
    /// `since`.
    ///
    /// First syncs only see live records. Afterwards, records first accepted
    /// after `since` are creates, older ones updates, tombstones deletions.
    pub fn add_to(self, changes: &mut ChangeSet, since: Option<Timestamp>) {
        match since {
            None if self.record.deleted => {}
            None => changes.push_created(self.record),
            Some(since) if self.record.updated_at <= since => {}
            Some(_) if self.record.deleted => {
                changes.push_deleted(&self.record.table, self.record.id)
            }
            Some(since) if self.created_at > since => changes.push_created(self.record),
            Some(_) => changes.push_updated(self.record),
        }
    }
}

/// Read access to stored records, implemented by each backend.
pub trait RecordLookup {
    fn find(&self, table: &str, id: &RecordId) -> Option<&Accepted>;
}

impl RecordLookup for BTreeMap<TableName, BTreeMap<RecordId, Accepted>> {
    fn find(&self, table: &str, id: &RecordId) -> Option<&Accepted> {
        self.get(table)?.get(id)
    }
}

/// What to do with one pushed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushDecision {
    Apply,
    AlreadyApplied,
    Reject(String),
}

/// Decide a pushed upsert (`Some(record)`) or deletion (`None`) against the
/// stored copy.
///
/// An upsert over a tombstone the pusher has already pulled brings the
/// record back; one over a tombstone it has not seen yet is rejected.
pub fn decide(
    existing: Option<&Accepted>,
    incoming: Option<&Record>,
    last_pulled_at: Timestamp,
) -> PushDecision {
    let Some(existing) = existing else {
        return PushDecision::Apply;
    };

    match incoming {
        Some(record)
            if !existing.record.deleted && existing.client_updated_at == record.updated_at =>
        {
            PushDecision::AlreadyApplied
        }
        Some(_) if existing.record.deleted && existing.record.updated_at > last_pulled_at => {
            PushDecision::Reject(format!(
                "deleted at {} after last pull at {}",
                existing.record.updated_at, last_pulled_at
            ))
        }
        None if existing.record.deleted => PushDecision::AlreadyApplied,
        _ if existing.record.updated_at > last_pulled_at => PushDecision::Reject(format!(
            "modified at {} after last pull at {}",
            existing.record.updated_at, last_pulled_at
        )),
        _ => PushDecision::Apply,
    }
}

/// A change the authority will store.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    /// Record as pushed; a tombstone for deletions
    pub record: Record,
    /// `created_at` of the stored copy, if any
    pub created_at: Option<Timestamp>,
}

impl Write {
    /// Stamp the write with the authority's time.
    pub fn accept(self, stamp: Timestamp) -> Accepted {
        let client_updated_at = self.record.updated_at;
        let mut record = self.record;
        record.updated_at = stamp;
        Accepted {
            record,
            client_updated_at,
            created_at: self.created_at.unwrap_or(stamp),
        }
    }
}

/// Everything a push will do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushPlan {
    pub writes: Vec<Write>,
    pub rejected: Vec<RejectedRecord>,
    /// Changes acknowledged without a write
    pub already_applied: usize,
}

impl PushPlan {
    /// A push is applied only when nothing is rejected.
    pub fn is_accepted(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Decide every change of a push.
pub fn plan_push<L: RecordLookup + ?Sized>(
    stored: &L,
    changes: &ChangeSet,
    last_pulled_at: Timestamp,
) -> Result<PushPlan> {
    changes.validate()?;
    let mut plan = PushPlan::default();

    for (table, table_changes) in changes.tables() {
        let upserts = table_changes
            .created
            .iter()
            .chain(table_changes.updated.iter())
            .map(|r| (r.id, Some(r)));
        let deletes = table_changes.deleted.iter().map(|id| (*id, None));

        for (id, incoming) in upserts.chain(deletes) {
            let existing = stored.find(table, &id);
            match decide(existing, incoming, last_pulled_at) {
                PushDecision::Apply => {
                    let record = match incoming {
                        Some(record) => Record {
                            deleted: false,
                            ..record.clone()
                        },
                        None => Record::tombstone(
                            id,
                            table.as_str(),
                            existing.map_or(0, |e| e.client_updated_at),
                        ),
                    };
                    plan.writes.push(Write {
                        record,
                        created_at: existing.map(|e| e.created_at),
                    });
                }
                PushDecision::AlreadyApplied => plan.already_applied += 1,
                PushDecision::Reject(reason) => plan.rejected.push(RejectedRecord {
                    table: table.clone(),
                    id,
                    reason,
                }),
            }
        }
    }

    Ok(plan)
}

/// In-memory authority.
#[derive(Debug, Clone)]
pub struct Authority {
    catalog: MigrationCatalog,
    clock: HybridClock,
    tables: BTreeMap<TableName, BTreeMap<RecordId, Accepted>>,
}

impl Authority {
    /// Create an empty authority serving `catalog`.
    pub fn new(catalog: MigrationCatalog) -> Self {
        Self {
            catalog,
            clock: HybridClock::new(),
            tables: BTreeMap::new(),
        }
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    /// Latest timestamp issued.
    pub fn last_timestamp(&self) -> Timestamp {
        self.clock.last()
    }

    /// Get a stored record, tombstones included.
    pub fn get(&self, table: &str, id: &RecordId) -> Option<&Accepted> {
        self.tables.find(table, id)
    }

    /// Number of stored records, tombstones included.
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Answer a pull at wall time `now`.
    pub fn pull(&mut self, request: &PullRequest, now: Timestamp) -> PullResponse {
        let negotiation = self.catalog.negotiate(request.schema_version);
        if !negotiation.compatible {
            return PullResponse::incompatible(
                self.clock.last(),
                self.catalog.current_version,
            );
        }

        let timestamp = self.clock.stamp(now);
        let full_tables: BTreeSet<&TableName> = request
            .migration
            .iter()
            .flat_map(|m| m.affected_tables())
            .collect();

        let mut changes = ChangeSet::new();
        for (table, records) in &self.tables {
            let since = if full_tables.contains(table) {
                None
            } else {
                request.last_pulled_at
            };
            for accepted in records.values() {
                accepted.clone().add_to(&mut changes, since);
            }
        }
        changes.prune();

        PullResponse::new(changes, timestamp).with_migrations(negotiation.migrations)
    }

    /// Apply a push at wall time `now`.
    ///
    /// All or nothing: a single rejection leaves the authority untouched.
    pub fn push(
        &mut self,
        changes: &ChangeSet,
        last_pulled_at: Timestamp,
        now: Timestamp,
    ) -> Result<PushOutcome> {
        let plan = plan_push(&self.tables, changes, last_pulled_at)?;
        if !plan.is_accepted() {
            return Ok(PushOutcome::rejected(plan.rejected));
        }
        if plan.writes.is_empty() {
            return Ok(PushOutcome::accepted());
        }

        let stamp = self.clock.stamp(now);
        for write in plan.writes {
            let accepted = write.accept(stamp);
            self.tables
                .entry(accepted.record.table.clone())
                .or_default()
                .insert(accepted.record.id, accepted);
        }

        Ok(PushOutcome::accepted_at(stamp))
    }
}
