//! Bounded exponential backoff around a sync cycle.

use crate::{
    coordinator::{SyncCoordinator, SyncReport},
    error::{Result, SyncError},
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// When and how often to retry a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// Attempts in total, the first one included
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Run a cycle, retrying transient failures under the coordinator's
/// configured [`RetryPolicy`].
///
/// Fatal and expected errors are returned at once. Cancelling `cancel` also
/// interrupts the wait between attempts.
pub async fn sync_with_retry(
    coordinator: &SyncCoordinator,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    let policy = &coordinator.config().retry;
    let mut attempt = 1;
    loop {
        match coordinator.sync_with_cancel(cancel).await {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, ?delay, error = %err, "sync failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            result => return result,
        }
    }
}
