//! Configuration management for the server.

use std::{env, path::PathBuf};
use tether_engine::MigrationCatalog;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; records stay in memory without one
    pub database_url: Option<String>,
    /// JSON file holding the migration catalog
    pub schema_catalog: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            schema_catalog: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let host = env::var("HOST").unwrap_or(defaults.host);

        let port = match env::var("PORT") {
            Ok(port) => port.parse().map_err(|_| ConfigError::InvalidPort(port))?,
            Err(_) => defaults.port,
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        let schema_catalog = env::var("SCHEMA_CATALOG").ok().map(PathBuf::from);

        Ok(Self {
            host,
            port,
            database_url,
            schema_catalog,
        })
    }

    /// Migration catalog to serve. Without a file the server is at version 1
    /// with no history.
    pub fn load_catalog(&self) -> Result<MigrationCatalog, ConfigError> {
        let Some(path) = &self.schema_catalog else {
            return Ok(MigrationCatalog::new(1));
        };

        let invalid = |reason: String| ConfigError::InvalidCatalog {
            path: path.clone(),
            reason,
        };
        let json = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| invalid(e.to_string()))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value: '{0}'")]
    InvalidPort(String),

    #[error("Invalid schema catalog {}: {reason}", path.display())]
    InvalidCatalog { path: PathBuf, reason: String },
}
