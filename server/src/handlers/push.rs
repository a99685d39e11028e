//! Push handler - stores changes from clients.

use crate::backend::Backend;
use crate::error::{AppError, Result};
use tether_engine::{protocol::PushParams, ChangeSet, PushOutcome};

/// Process a push from a client.
///
/// A push with records the client has not pulled the latest version of is
/// refused as a whole with [`AppError::Conflict`].
pub async fn handle_push(
    backend: &Backend,
    params: PushParams,
    changes: ChangeSet,
) -> Result<PushOutcome> {
    let outcome = backend.push(&changes, params.last_pulled_at).await?;

    if !outcome.is_accepted() {
        tracing::info!(
            rejected = outcome.rejected.len(),
            last_pulled_at = params.last_pulled_at,
            "push rejected"
        );
        return Err(AppError::Conflict(outcome));
    }

    tracing::debug!(
        changes = changes.len(),
        timestamp = ?outcome.timestamp,
        "push accepted"
    );
    Ok(outcome)
}
