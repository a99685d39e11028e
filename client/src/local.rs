//! Shared handle to the local store.
//!
//! [`LocalStore`] wraps the engine [`Store`] in an `RwLock` so the UI and the
//! sync coordinator can use it concurrently. Every lock is held for one
//! synchronous step only, never across a network call. The handle is cheap
//! to clone; clones share the same store.
//!
//! A store opened with a path is persisted as a JSON snapshot. [`flush`]
//! writes it to a temporary file and renames it over the previous one, so a
//! crash leaves either the old or the new snapshot, never a torn one.
//!
//! [`flush`]: LocalStore::flush

use crate::{
    error::{Result, SyncError},
    time::{SystemClock, TimeSource},
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tether_engine::{
    ChangeSet, Fields, MergeReport, Migration, Record, RecordId, Schema, Store, StoreSnapshot,
    SyncStatus, TableName, Timestamp,
};
use tokio::{
    io::AsyncWriteExt,
    sync::{broadcast, RwLock, RwLockReadGuard},
};

const EVENT_CAPACITY: usize = 256;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Written on this device
    Local,
    /// Merged from a pull
    Remote,
}

/// Published for every record written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub table: TableName,
    pub id: RecordId,
    pub kind: ChangeKind,
    pub origin: Origin,
}

/// Events of a single table.
#[derive(Debug)]
pub struct TableEvents {
    table: TableName,
    rx: broadcast::Receiver<StoreEvent>,
}

impl TableEvents {
    /// Next event of the table, `None` once the store is gone.
    ///
    /// Events missed by a slow subscriber are skipped.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.table == self.table => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(table = %self.table, missed, "store events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug)]
struct Shared {
    store: RwLock<Store>,
    path: Option<PathBuf>,
    events: broadcast::Sender<StoreEvent>,
    time: Arc<dyn TimeSource>,
}

/// Cloneable handle to a local store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    shared: Arc<Shared>,
}

impl LocalStore {
    /// Open a store persisted at `path`, or an in-memory one for `None`.
    ///
    /// An existing snapshot is loaded along with the schema it was saved
    /// with; `schema` is only used for a fresh store.
    pub async fn open(path: Option<impl AsRef<Path>>, schema: Schema) -> Result<Self> {
        Self::open_with_time(path, schema, Arc::new(SystemClock)).await
    }

    /// Like [`open`](Self::open) with an explicit time source.
    pub async fn open_with_time(
        path: Option<impl AsRef<Path>>,
        schema: Schema,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        let path = path.map(|p| p.as_ref().to_path_buf());
        let store = match &path {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(json) => {
                    let snapshot = StoreSnapshot::from_json(&json)?;
                    let store = Store::from_snapshot(snapshot)?;
                    tracing::debug!(path = %path.display(), "loaded local store");
                    store
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Store::new(schema),
                Err(e) => return Err(storage_error(path, e)),
            },
            None => Store::new(schema),
        };

        Ok(Self::from_store(store, path, time))
    }

    /// In-memory store driven by `time`.
    pub fn in_memory(schema: Schema, time: Arc<dyn TimeSource>) -> Self {
        Self::from_store(Store::new(schema), None, time)
    }

    fn from_store(store: Store, path: Option<PathBuf>, time: Arc<dyn TimeSource>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                store: RwLock::new(store),
                path,
                events,
                time,
            }),
        }
    }

    /// Snapshot file, if persisted.
    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    /// Current wall time of the store's time source.
    pub fn now(&self) -> Timestamp {
        self.shared.time.now()
    }

    /// Create a record with a fresh time-ordered id.
    pub async fn create(&self, table: &str, fields: Fields) -> Result<Record> {
        self.upsert(table, RecordId::now_v7(), fields).await
    }

    /// Create or replace a record.
    pub async fn upsert(&self, table: &str, id: RecordId, fields: Fields) -> Result<Record> {
        let now = self.now();
        let record = self
            .shared
            .store
            .write()
            .await
            .upsert(table, id, fields, now)?
            .clone();

        self.publish(table, id, ChangeKind::Upserted, Origin::Local);
        Ok(record)
    }

    /// Turn a record into a tombstone.
    pub async fn soft_delete(&self, table: &str, id: RecordId) -> Result<()> {
        let now = self.now();
        self.shared.store.write().await.soft_delete(table, id, now)?;

        self.publish(table, id, ChangeKind::Deleted, Origin::Local);
        Ok(())
    }

    /// Get a live record.
    pub async fn get(&self, table: &str, id: &RecordId) -> Option<Record> {
        self.shared.store.read().await.get(table, id).cloned()
    }

    /// Sync status of a record, tombstones included.
    pub async fn status(&self, table: &str, id: &RecordId) -> Option<SyncStatus> {
        self.shared.store.read().await.status(table, id)
    }

    /// Live records of `table` matching `predicate`.
    pub async fn scan<P>(&self, table: &str, predicate: P) -> Result<Vec<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        let store = self.shared.store.read().await;
        let records = store.scan(table, predicate)?.cloned().collect();
        Ok(records)
    }

    /// Read access to the whole store. Hold it briefly.
    pub async fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.shared.store.read().await
    }

    /// Apply a schema migration made by the app itself.
    pub async fn migrate(&self, migration: &Migration) -> Result<()> {
        self.shared.store.write().await.apply_migration(migration)?;
        Ok(())
    }

    /// Listen to every change of the store.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.events.subscribe()
    }

    /// Listen to the changes of one table.
    pub fn subscribe_table(&self, table: impl Into<TableName>) -> TableEvents {
        TableEvents {
            table: table.into(),
            rx: self.subscribe(),
        }
    }

    /// Run `f` under the write lock.
    pub(crate) async fn write_with<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        let mut store = self.shared.store.write().await;
        f(&mut store)
    }

    /// Announce the records a merge wrote.
    pub(crate) async fn publish_merge(&self, report: &MergeReport) {
        let store = self.shared.store.read().await;
        for (table, id) in &report.reconciled {
            let kind = match store.get_including_deleted(table, id) {
                Some(record) if record.deleted => ChangeKind::Deleted,
                _ => ChangeKind::Upserted,
            };
            self.publish(table, *id, kind, Origin::Remote);
        }
    }

    /// Mark pushed records as synced, see [`Store::mark_synced`].
    pub(crate) async fn mark_synced(
        &self,
        pushed: &ChangeSet,
        accepted_at: Option<Timestamp>,
    ) -> usize {
        self.shared
            .store
            .write()
            .await
            .mark_synced(pushed, accepted_at)
    }

    fn publish(&self, table: &str, id: RecordId, kind: ChangeKind, origin: Origin) {
        // no subscribers is fine
        let _ = self.shared.events.send(StoreEvent {
            table: table.to_string(),
            id,
            kind,
            origin,
        });
    }

    /// Persist the store, if it has a path.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.shared.path else {
            return Ok(());
        };

        let json = self.shared.store.read().await.export_snapshot().to_json()?;
        write_atomic(path, json.as_bytes()).await?;
        tracing::debug!(path = %path.display(), "flushed local store");
        Ok(())
    }

    /// Flush and drop this handle.
    pub async fn close(self) -> Result<()> {
        self.flush().await
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> SyncError {
    SyncError::Storage(format!("{}: {err}", path.display()))
}

/// Replace `path` with `contents` through a temporary sibling file.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_error(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| storage_error(&tmp, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| storage_error(&tmp, e))?;
    // contents must be on disk before the rename makes them visible
    file.sync_all()
        .await
        .map_err(|e| storage_error(&tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| storage_error(path, e))
}
