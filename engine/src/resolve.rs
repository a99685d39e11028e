//! Conflict resolution between a pulled record and the local copy.
//!
//! # Policy
//!
//! Resolution is last-writer-wins at whole-record granularity:
//!
//! 1. No pending local change (local absent, or equal to the common base):
//!    the remote record applies as is
//! 2. Both sides are tombstones, or carry the same fields: the remote
//!    record applies, nothing to decide
//! 3. Remote equal to the common base: only the local side changed, local
//!    is kept
//! 4. Local `updated_at` strictly later: local is kept
//! 5. Remote `updated_at` strictly later: remote replaces local
//! 6. Tie: a tombstone beats a live record, otherwise remote wins
//!
//! Rules 4-6 are reported as conflicts. The function reads nothing but its
//! arguments, so identical inputs always give identical outputs.

use crate::{Record, RecordId, TableName, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Which side won a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Local record kept, pushed again in the next cycle
    LocalWins,
    /// Remote record replaced the local one
    RemoteWins,
}

/// A record changed on both sides since the last sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub table: TableName,
    pub id: RecordId,
    pub local_updated_at: Timestamp,
    pub remote_updated_at: Timestamp,
    pub resolution: ConflictResolution,
}

/// Result of [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No pending local change; the remote record applies as is.
    Remote(Record),
    /// Remote unchanged since the base; the pending local change stands.
    Local(Record),
    /// Both sides changed; `winner` is the record to keep.
    Conflict {
        winner: Record,
        resolution: ConflictResolution,
    },
}

impl Resolution {
    /// The record to store.
    pub fn record(&self) -> &Record {
        match self {
            Resolution::Remote(record) | Resolution::Local(record) => record,
            Resolution::Conflict { winner, .. } => winner,
        }
    }

    /// Consume and return the record to store.
    pub fn into_record(self) -> Record {
        match self {
            Resolution::Remote(record) | Resolution::Local(record) => record,
            Resolution::Conflict { winner, .. } => winner,
        }
    }

    /// How the conflict was decided, if there was one.
    pub fn conflict(&self) -> Option<ConflictResolution> {
        match self {
            Resolution::Remote(_) | Resolution::Local(_) => None,
            Resolution::Conflict { resolution, .. } => Some(*resolution),
        }
    }
}

/// Both tombstones, or both live with identical fields.
fn same_content(local: &Record, remote: &Record) -> bool {
    match (local.deleted, remote.deleted) {
        (true, true) => true,
        (false, false) => local.fields == remote.fields,
        _ => false,
    }
}

/// Merge a remote record with the local copy of the same id.
///
/// `base` is the last version both sides agreed on, `None` when the local
/// store has no synced version of the record.
pub fn resolve(base: Option<&Record>, local: Option<&Record>, remote: &Record) -> Resolution {
    let local = match local {
        Some(local) if base != Some(local) => local,
        _ => return Resolution::Remote(remote.clone()),
    };

    if same_content(local, remote) {
        return Resolution::Remote(remote.clone());
    }

    if base == Some(remote) {
        return Resolution::Local(local.clone());
    }

    let local_wins = match local.updated_at.cmp(&remote.updated_at) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => local.deleted && !remote.deleted,
    };

    if local_wins {
        Resolution::Conflict {
            winner: local.clone(),
            resolution: ConflictResolution::LocalWins,
        }
    } else {
        Resolution::Conflict {
            winner: remote.clone(),
            resolution: ConflictResolution::RemoteWins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn id() -> RecordId {
        Uuid::from_u128(7)
    }

    fn named(name: &str, updated_at: Timestamp) -> Record {
        Record::new(id(), "clients", fields([("name", name)]), updated_at)
    }

    #[test]
    fn no_local_takes_remote() {
        let remote = named("B", 150);
        assert_eq!(resolve(None, None, &remote), Resolution::Remote(remote));
    }

    #[test]
    fn unchanged_local_takes_remote() {
        let local = named("A", 100);
        let remote = named("B", 150);

        let resolution = resolve(Some(&local), Some(&local), &remote);
        assert_eq!(resolution, Resolution::Remote(remote));
    }

    #[test]
    fn unchanged_local_takes_even_older_remote() {
        let local = named("A", 300);
        let remote = named("B", 150);

        let resolution = resolve(Some(&local), Some(&local), &remote);
        assert_eq!(resolution.conflict(), None);
        assert_eq!(resolution.record().get("name"), remote.get("name"));
    }

    #[test]
    fn remote_equal_to_base_keeps_local() {
        let base = named("A", 150);
        // local clock lagging behind the remote stamp
        let local = named("A2", 120);

        let resolution = resolve(Some(&base), Some(&local), &base);
        assert_eq!(resolution, Resolution::Local(local));
        assert_eq!(resolution.conflict(), None);
    }

    #[test]
    fn later_local_wins() {
        let local = named("A", 200);
        let remote = named("B", 150);

        let resolution = resolve(None, Some(&local), &remote);
        assert_eq!(resolution.conflict(), Some(ConflictResolution::LocalWins));
        assert_eq!(resolution.into_record(), local);
    }

    #[test]
    fn later_remote_wins() {
        let base = named("A", 100);
        let local = named("A2", 120);
        let remote = named("B", 150);

        let resolution = resolve(Some(&base), Some(&local), &remote);
        assert_eq!(resolution.conflict(), Some(ConflictResolution::RemoteWins));
        assert_eq!(resolution.into_record(), remote);
    }

    #[test]
    fn tie_goes_to_remote() {
        let local = named("A", 150);
        let remote = named("B", 150);

        let resolution = resolve(None, Some(&local), &remote);
        assert_eq!(resolution.conflict(), Some(ConflictResolution::RemoteWins));
    }

    #[test]
    fn later_remote_tombstone_wins() {
        let local = named("A", 120);
        let remote = Record::tombstone(id(), "clients", 150);

        let resolution = resolve(None, Some(&local), &remote);
        assert!(resolution.record().deleted);
    }

    #[test]
    fn later_local_tombstone_wins() {
        let local = Record::tombstone(id(), "clients", 200);
        let remote = named("B", 150);

        let resolution = resolve(None, Some(&local), &remote);
        assert_eq!(resolution.conflict(), Some(ConflictResolution::LocalWins));
        assert!(resolution.record().deleted);
    }

    #[test]
    fn tombstone_wins_tie() {
        let local = Record::tombstone(id(), "clients", 150);
        let remote = named("B", 150);
        assert!(resolve(None, Some(&local), &remote).record().deleted);

        let local = named("A", 150);
        let remote = Record::tombstone(id(), "clients", 150);
        assert!(resolve(None, Some(&local), &remote).record().deleted);
    }

    #[test]
    fn same_fields_are_not_a_conflict() {
        // a push whose response was lost, pulled back with the remote stamp
        let local = named("A", 100);
        let remote = named("A", 180);

        let resolution = resolve(None, Some(&local), &remote);
        assert_eq!(resolution, Resolution::Remote(remote));
    }

    #[test]
    fn two_tombstones_are_not_a_conflict() {
        let local = Record::tombstone(id(), "clients", 300);
        let remote = Record::tombstone(id(), "clients", 150);

        let resolution = resolve(None, Some(&local), &remote);
        assert_eq!(resolution, Resolution::Remote(remote));
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        (0u64..1_000, any::<bool>(), "[a-c]{1,2}").prop_map(|(updated_at, deleted, name)| {
            if deleted {
                Record::tombstone(id(), "clients", updated_at)
            } else {
                named(&name, updated_at)
            }
        })
    }

    proptest! {
        #[test]
        fn resolve_is_deterministic(
            base in proptest::option::of(arb_record()),
            local in proptest::option::of(arb_record()),
            remote in arb_record(),
        ) {
            let first = resolve(base.as_ref(), local.as_ref(), &remote);
            let second = resolve(base.as_ref(), local.as_ref(), &remote);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn winner_is_one_of_the_inputs(
            local in arb_record(),
            remote in arb_record(),
        ) {
            let winner = resolve(None, Some(&local), &remote).into_record();
            prop_assert!(winner == local || winner == remote);
        }

        #[test]
        fn later_remote_tombstone_always_wins(
            local in arb_record(),
            gap in 1u64..100,
        ) {
            let remote = Record::tombstone(id(), "clients", local.updated_at + gap);
            let resolution = resolve(None, Some(&local), &remote);
            prop_assert!(resolution.record().deleted);
        }

        #[test]
        fn winner_has_latest_timestamp(
            local in arb_record(),
            remote in arb_record(),
        ) {
            prop_assume!(!same_content(&local, &remote));
            let winner = resolve(None, Some(&local), &remote).into_record();
            prop_assert_eq!(winner.updated_at, local.updated_at.max(remote.updated_at));
        }
    }
}
