//! Hybrid clock for stamping local writes.
//!
//! Local writes must always sort after every remote timestamp the store has
//! seen, otherwise the change journal could miss them when it compares
//! `updated_at` against the watermark. The clock combines the caller's wall
//! time with the highest timestamp observed so far.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// A monotonic clock fed by wall time and remote observations.
///
/// Ordering rules:
/// 1. A stamp is never lower than the supplied wall time
/// 2. A stamp is always strictly greater than every previous stamp and every
///    observed remote timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridClock {
    /// Highest timestamp issued or observed
    last: Timestamp,
}

impl HybridClock {
    /// Create a clock that has seen nothing yet.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Create a clock that resumes from a known high-water mark.
    pub fn resume(last: Timestamp) -> Self {
        Self { last }
    }

    /// Issue a stamp for a local write happening at wall time `now`.
    pub fn stamp(&mut self, now: Timestamp) -> Timestamp {
        self.last = now.max(self.last.saturating_add(1));
        self.last
    }

    /// Fold in a timestamp produced elsewhere (remote record or watermark).
    pub fn observe(&mut self, remote: Timestamp) {
        self.last = self.last.max(remote);
    }

    /// Highest timestamp issued or observed.
    pub fn last(&self) -> Timestamp {
        self.last
    }
}
