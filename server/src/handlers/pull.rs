//! Pull handler - sends clients what changed since their watermark.

use crate::backend::Backend;
use crate::error::Result;
use tether_engine::{protocol::PullParams, PullRequest, PullResponse};

/// Process a pull request from a client.
pub async fn handle_pull(backend: &Backend, params: PullParams) -> Result<PullResponse> {
    let request = PullRequest::try_from(params)?;
    let response = backend.pull(&request).await?;

    if response.compatible {
        tracing::debug!(
            last_pulled_at = ?request.last_pulled_at,
            schema_version = request.schema_version,
            changes = response.changes.len(),
            timestamp = response.timestamp,
            "pull"
        );
    } else {
        tracing::info!(
            schema_version = request.schema_version,
            "pull from incompatible client"
        );
    }
    Ok(response)
}
