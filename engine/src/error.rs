//! Error types for the Tether engine.

use crate::{RecordId, SchemaVersion, TableName};
use thiserror::Error;

/// All possible errors from the Tether engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Validation errors
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    #[error("record not found: {table}/{id}")]
    RecordNotFound { table: TableName, id: RecordId },

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: TableName, column: String },

    #[error("missing required column: {0}")]
    MissingRequiredColumn(String),

    #[error("type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    // Store errors
    #[error("operation on deleted record: {table}/{id}")]
    OperationOnDeleted { table: TableName, id: RecordId },

    #[error("record {id} appears in more than one bucket of table '{table}'")]
    DuplicateChange { table: TableName, id: RecordId },

    #[error("record {id} of table '{actual}' filed under '{table}'")]
    MisfiledRecord {
        table: TableName,
        actual: TableName,
        id: RecordId,
    },

    // Schema and migration errors
    #[error("invalid migration {from} -> {to}: {reason}")]
    InvalidMigration {
        from: SchemaVersion,
        to: SchemaVersion,
        reason: String,
    },

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    // Protocol errors
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
