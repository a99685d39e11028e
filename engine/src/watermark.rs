//! The sync cursor.

use crate::{SchemaVersion, Timestamp};
use serde::{Deserialize, Serialize};

/// The last point both sides are known to agree on.
///
/// `timestamp` is always a value stamped by the remote, never the device
/// clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub timestamp: Timestamp,
    pub schema_version: SchemaVersion,
}

impl Watermark {
    pub fn new(timestamp: Timestamp, schema_version: SchemaVersion) -> Self {
        Self {
            timestamp,
            schema_version,
        }
    }
}

/// Durable sync state of one local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// `None` until the first cycle completes
    pub watermark: Option<Watermark>,
    /// Number of migrations the store took from the remote, monotonically
    /// increasing
    #[serde(default)]
    pub applied_migrations: u64,
}

impl SyncState {
    /// Timestamp to send as `last_pulled_at`.
    pub fn last_pulled_at(&self) -> Option<Timestamp> {
        self.watermark.map(|w| w.timestamp)
    }

    /// Whether `candidate` would move the watermark backwards.
    pub fn would_regress(&self, candidate: Timestamp) -> bool {
        self.watermark
            .map(|w| candidate < w.timestamp)
            .unwrap_or(false)
    }

    /// The state after a successful cycle.
    ///
    /// `applied_migrations` is the store's own running count, so migrations
    /// applied during a cycle that later failed are still counted once.
    /// Never regresses: a lower timestamp or count keeps the current one.
    pub fn advanced(&self, next: Watermark, applied_migrations: u64) -> Self {
        let timestamp = match self.watermark {
            Some(current) => current.timestamp.max(next.timestamp),
            None => next.timestamp,
        };
        Self {
            watermark: Some(Watermark::new(timestamp, next.schema_version)),
            applied_migrations: self.applied_migrations.max(applied_migrations),
        }
    }
}
