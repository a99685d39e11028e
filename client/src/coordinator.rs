//! Sync Coordinator.
//!
//! Runs the sync cycle as a small state machine:
//!
//! ```text
//! Idle -> Pulling -> Merging -> Pushing -> Committing -> Idle
//!            \          \          \           \
//!             +----------+----------+-----------+--> Failed
//! ```
//!
//! Only one cycle runs at a time; a second caller gets [`SyncError::Busy`]
//! at once instead of queueing. The watermark is saved last, after the store
//! has been flushed, so a cycle that fails anywhere is repeated from the same
//! watermark and merging the same pull twice changes nothing.
//!
//! Cancellation is honoured before pulling, merging and pushing. Once a push
//! has been acknowledged the cycle always commits.

use crate::{
    config::SyncConfig,
    error::{Result, SyncError},
    local::LocalStore,
    remote::Remote,
    state::StateStore,
};
use std::{future::Future, sync::Arc, time::Duration};
use tether_engine::{
    pending_migrations, Conflict, Journal, PullRequest, SyncState, Watermark,
};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Pulling,
    Merging,
    Pushing,
    Committing,
    /// The last cycle failed; the watermark was left untouched
    Failed,
}

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Watermark saved at the end of the cycle
    pub watermark: Watermark,
    /// Records received from the remote
    pub pulled: usize,
    /// Pulled records written to the store
    pub applied: usize,
    /// Local records kept over the remote version, pushed next cycle
    pub requeued: usize,
    /// Local changes accepted by the remote
    pub pushed: usize,
    pub migrations_applied: usize,
    pub conflicts: Vec<Conflict>,
}

/// Drives sync cycles for one local store.
pub struct SyncCoordinator {
    store: LocalStore,
    remote: Arc<dyn Remote>,
    state: Arc<dyn StateStore>,
    config: SyncConfig,
    journal: Journal,
    lock: Mutex<()>,
    phase: watch::Sender<SyncPhase>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn Remote>,
        state: Arc<dyn StateStore>,
        config: SyncConfig,
    ) -> Self {
        let journal = Journal::new(config.full_scan_threshold);
        let (phase, _) = watch::channel(SyncPhase::Idle);

        Self {
            store,
            remote,
            state,
            config,
            journal,
            lock: Mutex::new(()),
            phase,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Follow phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Run one cycle.
    pub async fn sync(&self) -> Result<SyncReport> {
        self.sync_with_cancel(&CancellationToken::new()).await
    }

    /// Run one cycle that stops early if `cancel` fires.
    #[tracing::instrument(skip_all)]
    pub async fn sync_with_cancel(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let Ok(_guard) = self.lock.try_lock() else {
            tracing::debug!("sync already running");
            return Err(SyncError::Busy);
        };

        let result = self.run(cancel).await;
        match &result {
            Ok(report) => {
                self.enter(SyncPhase::Idle);
                tracing::info!(
                    watermark = report.watermark.timestamp,
                    pulled = report.pulled,
                    pushed = report.pushed,
                    conflicts = report.conflicts.len(),
                    "sync complete"
                );
            }
            Err(err) => {
                self.enter(SyncPhase::Failed);
                if err.is_expected() {
                    tracing::info!(error = %err, "sync stopped");
                } else {
                    tracing::warn!(error = %err, "sync failed");
                }
            }
        }
        result
    }

    fn enter(&self, phase: SyncPhase) {
        tracing::trace!(?phase, "sync phase");
        self.phase.send_replace(phase);
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let state = self.state.load().await?;
        let since = state.last_pulled_at();

        checkpoint(cancel)?;
        self.enter(SyncPhase::Pulling);
        let request = self.pull_request(&state).await;
        let response = timed(
            "pull",
            self.config.pull_timeout,
            self.remote.pull(&request),
        )
        .await?;

        if !response.compatible {
            return Err(SyncError::SchemaIncompatible {
                local: request.schema_version,
                remote: response.schema_version,
            });
        }
        if state.would_regress(response.timestamp) {
            return Err(SyncError::Protocol(format!(
                "pull timestamp {} is behind the watermark {}",
                response.timestamp,
                since.unwrap_or_default()
            )));
        }

        checkpoint(cancel)?;
        self.enter(SyncPhase::Merging);
        let timestamp = response.timestamp;
        let pulled = response.changes.len();
        let now = self.store.now();
        let (merge, migrations_applied, schema_version, pulled_migrations) = self
            .store
            .write_with(|store| -> Result<_> {
                let migrations = pending_migrations(store.schema_version(), &response.migrations)?;
                store.apply_pulled_migrations(&migrations)?;
                let merge = store.merge_pulled(response.changes, timestamp, now)?;
                Ok((
                    merge,
                    migrations.len(),
                    store.schema_version(),
                    store.pulled_migrations(),
                ))
            })
            .await?;

        if migrations_applied > 0 {
            tracing::info!(migrations_applied, schema_version, "applied pulled migrations");
        }
        for conflict in &merge.conflicts {
            tracing::debug!(
                table = %conflict.table,
                id = %conflict.id,
                resolution = ?conflict.resolution,
                "conflict resolved"
            );
        }
        self.store.publish_merge(&merge).await;

        checkpoint(cancel)?;
        let outbound = self
            .journal
            .collect_excluding(&*self.store.read().await, since, &merge.reconciled);

        let mut pushed = 0;
        let mut accepted_at = None;
        if !outbound.is_empty() {
            self.enter(SyncPhase::Pushing);
            let last_pulled_at = since.unwrap_or(timestamp);
            let outcome = timed(
                "push",
                self.config.push_timeout,
                self.remote.push(&outbound, last_pulled_at),
            )
            .await?;

            if !outcome.is_accepted() {
                return Err(SyncError::PushRejected {
                    rejected: outcome.rejected,
                });
            }
            pushed = outbound.len();
            accepted_at = outcome.timestamp;
        }

        self.enter(SyncPhase::Committing);
        if pushed > 0 {
            self.store.mark_synced(&outbound, accepted_at).await;
        }
        self.store.flush().await?;

        let next = state.advanced(Watermark::new(timestamp, schema_version), pulled_migrations);
        self.state.save(&next).await?;

        Ok(SyncReport {
            watermark: next
                .watermark
                .unwrap_or_else(|| Watermark::new(timestamp, schema_version)),
            pulled,
            applied: merge.applied,
            requeued: merge.requeued,
            pushed,
            migrations_applied,
            conflicts: merge.conflicts,
        })
    }

    /// Pull request for the saved state.
    ///
    /// When the local schema moved on since the last sync the request
    /// describes the new tables and columns so the remote sends them in full.
    /// If that is not possible the whole dataset is pulled again.
    async fn pull_request(&self, state: &SyncState) -> PullRequest {
        let store = self.store.read().await;
        let version = store.schema_version();
        let request = PullRequest::new(state.last_pulled_at(), version);

        let Some(watermark) = state.watermark.filter(|w| w.schema_version < version) else {
            return request;
        };

        let enabled = self
            .config
            .migrations_enabled_at
            .map_or(true, |at| watermark.schema_version >= at);
        match store
            .migration_changes_since(watermark.schema_version)
            .filter(|_| enabled)
        {
            Some(changes) => request.with_migration(changes),
            None => {
                tracing::info!(
                    from = watermark.schema_version,
                    to = version,
                    "schema changed since last sync, pulling everything"
                );
                PullRequest::new(None, version)
            }
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

async fn timed<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| SyncError::Timeout { operation })?
}
