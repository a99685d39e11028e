//! # Tether Client
//!
//! Async side of Tether: keeps a [`LocalStore`] in step with a remote
//! authority.
//!
//! A [`SyncCoordinator`] runs one cycle at a time:
//!
//! 1. pull everything the remote changed since the stored watermark
//! 2. apply pulled migrations, then merge the pulled records
//! 3. push the local changes the merge did not touch
//! 4. mark the pushed records synced and persist the new watermark
//!
//! The watermark only moves once a cycle has gone through completely, so a
//! failed or cancelled cycle is simply run again.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_client::{FileStateStore, HttpRemote, LocalStore, SyncConfig, SyncCoordinator};
//! use tether_engine::{ColumnSchema, ColumnType, Schema, TableSchema};
//!
//! # async fn run() -> Result<(), tether_client::SyncError> {
//! let schema = Schema::new(1).with_table(TableSchema::new(
//!     "clients",
//!     vec![ColumnSchema::required("name", ColumnType::String)],
//! ));
//!
//! let config = SyncConfig::load().map_err(|e| tether_client::SyncError::Storage(e.to_string()))?;
//! let store = LocalStore::open(Some("data/store.json"), schema).await?;
//! let remote = Arc::new(HttpRemote::new(&config)?);
//! let state = Arc::new(FileStateStore::in_dir("data"));
//!
//! let coordinator = SyncCoordinator::new(store.clone(), remote, state, config);
//! let report = coordinator.sync().await?;
//! println!("pushed {} change(s)", report.pushed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod local;
pub mod remote;
pub mod retry;
pub mod state;
pub mod time;

pub use config::{ConfigError, SyncConfig};
pub use coordinator::{SyncCoordinator, SyncPhase, SyncReport};
pub use error::{Result, SyncError};
pub use http::HttpRemote;
pub use local::{ChangeKind, LocalStore, Origin, StoreEvent, TableEvents};
pub use remote::{InMemoryRemote, Remote};
pub use retry::{sync_with_retry, RetryPolicy};
pub use state::{FileStateStore, MemoryStateStore, StateStore, STATE_FILE_NAME};
pub use time::{ManualClock, SystemClock, TimeSource};
