//! Schema definition and validation.
//!
//! Schemas define the tables of the local store and their columns. Local
//! writes are validated against them; records arriving from the remote are
//! only coerced, since the remote is authoritative.

use crate::{error::Result, Error, Fields, SchemaVersion, TableName, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    /// Milliseconds since epoch
    Timestamp,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::String => write!(f, "String"),
            ColumnType::Number => write!(f, "Number"),
            ColumnType::Boolean => write!(f, "Bool"),
            ColumnType::Timestamp => write!(f, "Timestamp"),
        }
    }
}

/// Definition of a column in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name
    pub name: String,
    /// Column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column may be absent or null
    #[serde(default)]
    pub is_optional: bool,
    /// Whether the column is indexed for lookups
    #[serde(default)]
    pub is_indexed: bool,
}

impl ColumnSchema {
    /// Create a new required column definition.
    pub fn required(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_optional: false,
            is_indexed: false,
        }
    }

    /// Create a new optional column definition.
    pub fn optional(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_optional: true,
            is_indexed: false,
        }
    }

    /// Mark the column as indexed.
    pub fn indexed(mut self) -> Self {
        self.is_indexed = true;
        self
    }

    /// Validate a value against this column definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.is_optional => Ok(()),
            None | Some(Value::Null) => Err(Error::MissingRequiredColumn(self.name.clone())),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match (self.column_type, value) {
            (ColumnType::String, Value::String(_)) => true,
            (ColumnType::Number, Value::Number(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            (ColumnType::Timestamp, Value::Timestamp(_)) => true,
            (ColumnType::Timestamp, Value::Number(n)) => *n >= 0.0 && n.fract() == 0.0,
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                column: self.name.clone(),
                expected: self.column_type.to_string(),
                got: value.type_name().to_string(),
            })
        }
    }

    /// Convert a wire value into the column's native representation.
    fn coerce(&self, value: Value) -> Value {
        match (self.column_type, value) {
            (ColumnType::Timestamp, Value::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                Value::Timestamp(n as u64)
            }
            (_, v) => v,
        }
    }
}

/// Schema for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: TableName,
    /// Column definitions
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(name: impl Into<TableName>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Get a column definition by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Validate locally written fields against this schema.
    pub fn validate_fields(&self, fields: &Fields) -> Result<()> {
        for name in fields.keys() {
            if self.column(name).is_none() {
                return Err(Error::UnknownColumn {
                    table: self.name.clone(),
                    column: name.clone(),
                });
            }
        }

        for column in &self.columns {
            column.validate(fields.get(&column.name))?;
        }

        Ok(())
    }

    /// Coerce wire values to column types. Unknown columns pass through
    /// untouched.
    pub fn coerce(&self, fields: Fields) -> Fields {
        fields
            .into_iter()
            .map(|(name, value)| match self.column(&name) {
                Some(column) => {
                    let value = column.coerce(value);
                    (name, value)
                }
                None => (name, value),
            })
            .collect()
    }
}

/// Schema for the entire store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema version, bumped by every migration
    pub version: SchemaVersion,
    /// Table schemas by name
    pub tables: BTreeMap<TableName, TableSchema>,
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            tables: BTreeMap::new(),
        }
    }

    /// Add a table to the schema.
    pub fn add_table(&mut self, table: TableSchema) -> &mut Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Builder-style method to add a table.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.add_table(table);
        self
    }

    /// Get a table schema by name.
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Get a table schema by name, or fail.
    pub fn table(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }
}
