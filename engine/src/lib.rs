//! # Tether Engine
//!
//! A deterministic sync engine for local-first applications.
//!
//! This crate holds the core logic for keeping an on-device store consistent
//! with a single remote authority: records and schemas, the local store, the
//! change journal, conflict resolution, migration negotiation and the wire
//! types of the pull/push protocol. The same inputs always produce the same
//! outputs.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Deterministic**: Time is always passed in, never read
//! - **Testable**: Pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] has a client-assigned UUID, a table, a map of closed
//! [`Value`]s, an `updated_at` timestamp and a tombstone flag. Deletes are
//! soft: the tombstone keeps the id so peers that sync later still learn
//! about the deletion.
//!
//! ### Local Store and Journal
//!
//! The [`Store`] keeps a [`SyncStatus`] per record and stamps local writes
//! with a [`HybridClock`] that never falls behind a timestamp seen from the
//! remote. The [`Journal`] derives the outbound [`ChangeSet`] from statuses
//! and an `updated_at` index, without a write-ahead log.
//!
//! ### Conflict Resolution
//!
//! [`resolve`] is whole-record last-writer-wins on `updated_at`, with
//! tombstones winning ties.
//!
//! ### Migrations
//!
//! Only additive [`Migration`]s exist. The remote's [`MigrationCatalog`]
//! negotiates the chain an older client needs, or declares it incompatible.
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_engine::{
//!     fields, ColumnSchema, ColumnType, Journal, Schema, Store, TableSchema,
//! };
//! use uuid::Uuid;
//!
//! // 1. Define a schema
//! let schema = Schema::new(1).with_table(TableSchema::new(
//!     "clients",
//!     vec![
//!         ColumnSchema::required("name", ColumnType::String),
//!         ColumnSchema::optional("phone", ColumnType::String),
//!     ],
//! ));
//!
//! // 2. Create a store and write to it
//! let mut store = Store::new(schema);
//! let id = Uuid::from_u128(1);
//! store
//!     .upsert("clients", id, fields([("name", "Alice")]), 1706745600000)
//!     .unwrap();
//!
//! // 3. Collect what has to be pushed
//! let changes = Journal::default().collect(&store, None);
//! assert_eq!(changes.len(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_snapshot`] and [`Store::from_snapshot`] with
//! [`StoreSnapshot`] for persistence. Snapshots are serializable to JSON with
//! deterministic ordering.

pub mod authority;
pub mod changeset;
pub mod clock;
pub mod error;
pub mod journal;
pub mod migration;
pub mod protocol;
pub mod record;
pub mod resolve;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod value;
pub mod watermark;

// Re-export main types at crate root
pub use authority::{Accepted, Authority, PushPlan};
pub use changeset::{ChangeSet, TableChanges};
pub use clock::HybridClock;
pub use error::Error;
pub use journal::{Journal, ScanMode, DEFAULT_FULL_SCAN_THRESHOLD};
pub use migration::{
    pending_migrations, Migration, MigrationCatalog, MigrationStep, MigrationSyncChanges,
    Negotiation,
};
pub use protocol::{PullRequest, PullResponse, PushOutcome, RejectedRecord};
pub use record::{Record, SyncStatus};
pub use resolve::{resolve, Conflict, ConflictResolution, Resolution};
pub use schema::{ColumnSchema, ColumnType, Schema, TableSchema};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{MergeReport, Row, Store, Table};
pub use value::{fields, Fields, Value};
pub use watermark::{SyncState, Watermark};

/// Type aliases for clarity
pub type RecordId = uuid::Uuid;
pub type TableName = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
