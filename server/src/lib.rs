//! Tether Server - reference sync authority for local-first clients.
//!
//! Serves the pull/push contract of `tether-engine` over HTTP. Records are
//! kept in PostgreSQL, or in memory when no database is configured.

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

pub use routes::build_router;

use crate::backend::Backend;
use std::sync::Arc;
use tether_engine::SchemaVersion;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    /// Schema version the server serves
    pub schema_version: SchemaVersion,
}

impl AppState {
    pub fn new(backend: Backend, schema_version: SchemaVersion) -> Self {
        Self {
            backend: Arc::new(backend),
            schema_version,
        }
    }
}
