//! Configuration management for the client.

use crate::retry::RetryPolicy;
use std::{env, str::FromStr, time::Duration};
use tether_engine::{SchemaVersion, DEFAULT_FULL_SCAN_THRESHOLD};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sync configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the remote, e.g. `https://sync.example.com`
    pub endpoint: String,
    pub pull_timeout: Duration,
    pub push_timeout: Duration,
    /// Tables up to this size are scanned linearly by the journal
    pub full_scan_threshold: usize,
    /// Oldest synced schema version for which local schema changes are
    /// described to the remote instead of forcing a full pull
    pub migrations_enabled_at: Option<SchemaVersion>,
    pub retry: RetryPolicy,
}

impl SyncConfig {
    /// Default settings for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            pull_timeout: DEFAULT_TIMEOUT,
            push_timeout: DEFAULT_TIMEOUT,
            full_scan_threshold: DEFAULT_FULL_SCAN_THRESHOLD,
            migrations_enabled_at: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Load `.env` if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = env::var("TETHER_ENDPOINT").map_err(|_| ConfigError::MissingEndpoint)?;
        let mut config = Self::new(endpoint.trim_end_matches('/'));

        if let Some(ms) = parse_var::<u64>("TETHER_PULL_TIMEOUT_MS")? {
            config.pull_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("TETHER_PUSH_TIMEOUT_MS")? {
            config.push_timeout = Duration::from_millis(ms);
        }
        if let Some(threshold) = parse_var("TETHER_FULL_SCAN_THRESHOLD")? {
            config.full_scan_threshold = threshold;
        }
        config.migrations_enabled_at = parse_var("TETHER_MIGRATIONS_ENABLED_AT")?;
        if let Some(attempts) = parse_var::<u32>("TETHER_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(ConfigError::Invalid {
                    name: "TETHER_MAX_ATTEMPTS",
                    value: attempts.to_string(),
                });
            }
            config.retry.max_attempts = attempts;
        }

        Ok(config)
    }

    pub fn with_timeouts(mut self, pull: Duration, push: Duration) -> Self {
        self.pull_timeout = pull;
        self.push_timeout = push;
        self
    }

    pub fn with_migrations_enabled_at(mut self, version: SchemaVersion) -> Self {
        self.migrations_enabled_at = Some(version);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TETHER_ENDPOINT environment variable is required")]
    MissingEndpoint,

    #[error("Invalid {name} value: '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables are process-wide; keep every env test in here.
    #[test]
    fn from_env() {
        env::remove_var("TETHER_ENDPOINT");
        assert!(matches!(
            SyncConfig::from_env(),
            Err(ConfigError::MissingEndpoint)
        ));

        env::set_var("TETHER_ENDPOINT", "http://localhost:3000/");
        env::set_var("TETHER_PULL_TIMEOUT_MS", "1500");
        env::set_var("TETHER_MIGRATIONS_ENABLED_AT", "3");
        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.endpoint, "http://localhost:3000");
        assert_eq!(config.pull_timeout, Duration::from_millis(1500));
        assert_eq!(config.push_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.migrations_enabled_at, Some(3));
        assert_eq!(config.full_scan_threshold, DEFAULT_FULL_SCAN_THRESHOLD);

        env::set_var("TETHER_MAX_ATTEMPTS", "0");
        assert!(matches!(
            SyncConfig::from_env(),
            Err(ConfigError::Invalid { name: "TETHER_MAX_ATTEMPTS", .. })
        ));

        env::set_var("TETHER_MAX_ATTEMPTS", "many");
        assert!(matches!(
            SyncConfig::from_env(),
            Err(ConfigError::Invalid { name: "TETHER_MAX_ATTEMPTS", value }) if value == "many"
        ));

        let config = SyncConfig::new("http://localhost").with_retry(RetryPolicy::none());
        assert_eq!(config.retry, RetryPolicy::none());

        for name in [
            "TETHER_ENDPOINT",
            "TETHER_PULL_TIMEOUT_MS",
            "TETHER_MIGRATIONS_ENABLED_AT",
            "TETHER_MAX_ATTEMPTS",
        ] {
            env::remove_var(name);
        }
    }
}
