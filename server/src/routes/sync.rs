//! Sync endpoint routes.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use tether_engine::{
    protocol::{PullParams, PushParams},
    ChangeSet, PullResponse, PushOutcome,
};

use crate::error::Result;
use crate::handlers::{handle_pull, handle_push};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/sync", get(pull_handler).post(push_handler))
}

/// POST /sync - Push local changes to the server.
async fn push_handler(
    State(state): State<AppState>,
    Query(params): Query<PushParams>,
    Json(changes): Json<ChangeSet>,
) -> Result<Json<PushOutcome>> {
    let outcome = handle_push(&state.backend, params, changes).await?;
    Ok(Json(outcome))
}

/// GET /sync - Pull changes since a watermark.
async fn pull_handler(
    State(state): State<AppState>,
    Query(params): Query<PullParams>,
) -> Result<Json<PullResponse>> {
    let response = handle_pull(&state.backend, params).await?;
    Ok(Json(response))
}
