//! The remote authority as seen by the coordinator.

use crate::{
    error::{Result, SyncError},
    time::TimeSource,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tether_engine::{
    Authority, ChangeSet, MigrationCatalog, PullRequest, PullResponse, PushOutcome, Timestamp,
};

/// Pull/push endpoint of a remote authority.
///
/// A push rejected because of newer remote changes is an `Ok` outcome with a
/// non-empty `rejected` list; errors are reserved for failures.
#[async_trait]
pub trait Remote: Send + Sync {
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse>;

    async fn push(&self, changes: &ChangeSet, last_pulled_at: Timestamp) -> Result<PushOutcome>;
}

/// An in-process authority, for tests and offline setups.
#[derive(Debug)]
pub struct InMemoryRemote {
    authority: Mutex<Authority>,
    time: Arc<dyn TimeSource>,
}

impl InMemoryRemote {
    pub fn new(catalog: MigrationCatalog, time: Arc<dyn TimeSource>) -> Self {
        Self {
            authority: Mutex::new(Authority::new(catalog)),
            time,
        }
    }

    /// Run `f` against the authority.
    pub fn with_authority<R>(&self, f: impl FnOnce(&mut Authority) -> R) -> R {
        let mut authority = self.authority.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut authority)
    }
}

#[async_trait]
impl Remote for InMemoryRemote {
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
        let now = self.time.now();
        Ok(self.with_authority(|a| a.pull(request, now)))
    }

    async fn push(&self, changes: &ChangeSet, last_pulled_at: Timestamp) -> Result<PushOutcome> {
        let now = self.time.now();
        self.with_authority(|a| a.push(changes, last_pulled_at, now))
            .map_err(SyncError::from)
    }
}
