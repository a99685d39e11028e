//! Durable sync state.

use crate::{
    error::{Result, SyncError},
    local::write_atomic,
};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};
use tether_engine::SyncState;

/// File name of the persisted state.
pub const STATE_FILE_NAME: &str = "sync-state.json";

/// Where the coordinator keeps its [`SyncState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The saved state, or the default one before the first sync.
    async fn load(&self) -> Result<SyncState>;

    /// Replace the saved state.
    async fn save(&self, state: &SyncState) -> Result<()>;
}

/// State kept in a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `sync-state.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<SyncState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                SyncError::Storage(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncState::default()),
            Err(e) => Err(SyncError::Storage(format!("{}: {e}", self.path.display()))),
        }
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        let json = serde_json::to_vec(state).map_err(|e| SyncError::Storage(e.to_string()))?;
        write_atomic(&self.path, &json).await
    }
}

/// State kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<SyncState>,
}

impl MemoryStateStore {
    pub fn new(state: SyncState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// The state as last saved.
    pub fn get(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<SyncState> {
        Ok(self.get())
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = *state;
        Ok(())
    }
}
