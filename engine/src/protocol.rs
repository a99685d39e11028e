//! Wire types for the pull/push exchange.
//!
//! ```text
//! GET  sync?last_pulled_at=<ms|null>&schema_version=<n>&migration=<json|null>
//!      -> { changes, timestamp, migrations, compatible }
//! POST sync?last_pulled_at=<ms>   body: changes
//!      -> 2xx (empty or { rejected: [] }) | 409 { rejected: [...] }
//! ```

use crate::{
    error::Result,
    migration::{Migration, MigrationSyncChanges},
    ChangeSet, Error, RecordId, SchemaVersion, TableName, Timestamp,
};
use serde::{Deserialize, Serialize};

const NULL: &str = "null";

/// A pull as the client means it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// `None` asks for a full first-time sync
    pub last_pulled_at: Option<Timestamp>,
    pub schema_version: SchemaVersion,
    /// Local schema changes since the last sync
    pub migration: Option<MigrationSyncChanges>,
}

impl PullRequest {
    pub fn new(last_pulled_at: Option<Timestamp>, schema_version: SchemaVersion) -> Self {
        Self {
            last_pulled_at,
            schema_version,
            migration: None,
        }
    }

    /// Builder-style method to attach migration sync changes.
    pub fn with_migration(mut self, migration: MigrationSyncChanges) -> Self {
        self.migration = Some(migration);
        self
    }
}

/// Pull query string, every parameter kept as text.
///
/// Absent parameters and the literal `null` both mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pulled_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration: Option<String>,
}

fn non_null(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| *v != NULL && !v.is_empty())
}

impl TryFrom<&PullRequest> for PullParams {
    type Error = Error;

    fn try_from(request: &PullRequest) -> Result<Self> {
        let migration = match &request.migration {
            Some(m) => serde_json::to_string(m).map_err(|e| Error::MalformedRequest(e.to_string()))?,
            None => NULL.to_string(),
        };

        Ok(Self {
            last_pulled_at: Some(
                request
                    .last_pulled_at
                    .map_or_else(|| NULL.to_string(), |t| t.to_string()),
            ),
            schema_version: Some(request.schema_version.to_string()),
            migration: Some(migration),
        })
    }
}

impl TryFrom<PullParams> for PullRequest {
    type Error = Error;

    fn try_from(params: PullParams) -> Result<Self> {
        let last_pulled_at = non_null(params.last_pulled_at.as_ref())
            .map(|v| {
                v.parse::<Timestamp>()
                    .map_err(|_| Error::MalformedRequest(format!("last_pulled_at: '{v}'")))
            })
            .transpose()?;

        let schema_version = non_null(params.schema_version.as_ref())
            .ok_or_else(|| Error::MalformedRequest("missing schema_version".into()))?;
        let schema_version = schema_version
            .parse::<SchemaVersion>()
            .map_err(|_| Error::MalformedRequest(format!("schema_version: '{schema_version}'")))?;

        let migration = non_null(params.migration.as_ref())
            .map(|v| {
                serde_json::from_str::<MigrationSyncChanges>(v)
                    .map_err(|e| Error::MalformedRequest(format!("migration: {e}")))
            })
            .transpose()?;

        Ok(Self {
            last_pulled_at,
            schema_version,
            migration,
        })
    }
}

fn compatible_by_default() -> bool {
    true
}

/// The remote's answer to a pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: ChangeSet,
    /// New watermark, stamped by the remote
    pub timestamp: Timestamp,
    /// Migrations the client has to apply before merging
    #[serde(default)]
    pub migrations: Vec<Migration>,
    #[serde(default = "compatible_by_default")]
    pub compatible: bool,
    /// Remote schema version, sent along with an incompatible answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<SchemaVersion>,
}

impl PullResponse {
    pub fn new(changes: ChangeSet, timestamp: Timestamp) -> Self {
        Self {
            changes,
            timestamp,
            migrations: Vec::new(),
            compatible: true,
            schema_version: None,
        }
    }

    /// Response to a client whose schema cannot be brought up to date.
    pub fn incompatible(timestamp: Timestamp, schema_version: SchemaVersion) -> Self {
        Self {
            changes: ChangeSet::new(),
            timestamp,
            migrations: Vec::new(),
            compatible: false,
            schema_version: Some(schema_version),
        }
    }

    /// Builder-style method to attach migrations.
    pub fn with_migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.migrations = migrations;
        self
    }
}

/// Push query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushParams {
    pub last_pulled_at: Timestamp,
}

/// A record the remote refused to take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub table: TableName,
    pub id: RecordId,
    pub reason: String,
}

/// The remote's answer to a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    #[serde(default)]
    pub rejected: Vec<RejectedRecord>,
    /// Time the remote stamped the accepted records with, when it says so
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl PushOutcome {
    /// Every record was taken.
    pub fn accepted() -> Self {
        Self::default()
    }

    /// Every record was taken and stamped `timestamp`.
    pub fn accepted_at(timestamp: Timestamp) -> Self {
        Self {
            rejected: Vec::new(),
            timestamp: Some(timestamp),
        }
    }

    /// Some records were refused; nothing was applied.
    pub fn rejected(rejected: Vec<RejectedRecord>) -> Self {
        Self {
            rejected,
            timestamp: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.rejected.is_empty()
    }
}
