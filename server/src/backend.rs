//! Where the canonical records live.
//!
//! Both backends follow the rules in `tether_engine::authority`; they differ
//! only in storage. Server time is wall-clock milliseconds.

use crate::{
    db::{self, Pool},
    error::Result,
};
use std::collections::{BTreeMap, BTreeSet};
use tether_engine::{
    authority::plan_push, Authority, ChangeSet, MigrationCatalog, PullRequest, PullResponse,
    PushOutcome, TableName, Timestamp,
};
use tokio::sync::Mutex;

/// Storage behind the `/sync` endpoints.
#[derive(Debug)]
pub enum Backend {
    Postgres {
        pool: Pool,
        catalog: MigrationCatalog,
    },
    Memory(Mutex<Authority>),
}

/// Current wall time in milliseconds.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

impl Backend {
    pub fn postgres(pool: Pool, catalog: MigrationCatalog) -> Self {
        Self::Postgres { pool, catalog }
    }

    pub fn memory(catalog: MigrationCatalog) -> Self {
        Self::Memory(Mutex::new(Authority::new(catalog)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres { .. } => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    /// Answer a pull.
    pub async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
        let now = now_millis();
        match self {
            Self::Memory(authority) => Ok(authority.lock().await.pull(request, now)),
            Self::Postgres { pool, catalog } => pull_postgres(pool, catalog, request, now).await,
        }
    }

    /// Apply a push; all or nothing.
    pub async fn push(&self, changes: &ChangeSet, last_pulled_at: Timestamp) -> Result<PushOutcome> {
        let now = now_millis();
        match self {
            Self::Memory(authority) => Ok(authority.lock().await.push(changes, last_pulled_at, now)?),
            Self::Postgres { pool, .. } => push_postgres(pool, changes, last_pulled_at, now).await,
        }
    }
}

async fn pull_postgres(
    pool: &Pool,
    catalog: &MigrationCatalog,
    request: &PullRequest,
    now: Timestamp,
) -> Result<PullResponse> {
    let mut tx = pool.begin().await?;

    let negotiation = catalog.negotiate(request.schema_version);
    if !negotiation.compatible {
        let last = db::last_stamp(&mut tx).await?;
        return Ok(PullResponse::incompatible(last, catalog.current_version));
    }

    // Stamping first waits for any push holding the clock, so every record
    // stamped at or before `timestamp` is visible to the read below.
    let timestamp = db::stamp(&mut tx, now).await?;

    let full_tables: BTreeSet<TableName> = request
        .migration
        .iter()
        .flat_map(|m| m.affected_tables().cloned())
        .collect();
    let full: Vec<TableName> = full_tables.iter().cloned().collect();
    let stored = db::changed_since(&mut tx, request.last_pulled_at, &full).await?;
    tx.commit().await?;

    let mut changes = ChangeSet::new();
    for (table, records) in stored {
        let since = if full_tables.contains(&table) {
            None
        } else {
            request.last_pulled_at
        };
        for accepted in records.into_values() {
            accepted.add_to(&mut changes, since);
        }
    }
    changes.prune();

    Ok(PullResponse::new(changes, timestamp).with_migrations(negotiation.migrations))
}

async fn push_postgres(
    pool: &Pool,
    changes: &ChangeSet,
    last_pulled_at: Timestamp,
    now: Timestamp,
) -> Result<PushOutcome> {
    changes.validate()?;

    let mut keys: BTreeMap<&TableName, Vec<_>> = BTreeMap::new();
    for (table, id) in changes.keys() {
        keys.entry(table).or_default().push(*id);
    }

    let mut tx = pool.begin().await?;
    let stored = db::lock_pushed(&mut tx, keys).await?;

    let plan = plan_push(&stored, changes, last_pulled_at)?;
    if !plan.is_accepted() {
        tx.rollback().await?;
        return Ok(PushOutcome::rejected(plan.rejected));
    }
    if plan.writes.is_empty() {
        tx.rollback().await?;
        return Ok(PushOutcome::accepted());
    }

    let stamp = db::stamp(&mut tx, now).await?;
    for write in plan.writes {
        db::upsert_record(&mut tx, &write.accept(stamp)).await?;
    }
    tx.commit().await?;

    tracing::debug!(
        stamp,
        already_applied = plan.already_applied,
        "push stored"
    );
    Ok(PushOutcome::accepted_at(stamp))
}
