//! Runtime configuration.
//!
//! Values come from defaults, optionally overridden by environment variables
//! (a `.env` file is honoured by the binary through `dotenvy`).

use std::time::Duration;

use serde::Deserialize;

use crate::database::TxBehavior;
use crate::{Error, Result};

/// Default SQLite database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:playture.db?mode=rwc";

/// Pool bounds match the production deployment (min 5 / max 10).
const DEFAULT_MIN_CONNECTIONS: u32 = 5;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_UOW_TIMEOUT_MS: u64 = 10_000;

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// How long SQLite waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl DatabaseConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Unit-of-work settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UnitOfWorkConfig {
    /// Deadline applied when the caller does not pass one.
    pub default_timeout_ms: u64,
    pub behavior: TxBehavior,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_UOW_TIMEOUT_MS,
            behavior: TxBehavior::Immediate,
        }
    }
}

impl UnitOfWorkConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
    /// Directory for daily-rolling log files; console only when unset.
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: crate::logging::DEFAULT_LOG_FILTER.to_string(),
            dir: None,
        }
    }
}

/// Top-level configuration for the store.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    pub unit_of_work: UnitOfWorkConfig,
    pub log: LogConfig,
}

impl StoreConfig {
    /// Build a configuration from the process environment.
    ///
    /// Recognised variables: `DATABASE_URL`, `PLAYTURE_DB_MIN_CONNECTIONS`,
    /// `PLAYTURE_DB_MAX_CONNECTIONS`, `PLAYTURE_DB_ACQUIRE_TIMEOUT_MS`,
    /// `PLAYTURE_DB_BUSY_TIMEOUT_MS`, `PLAYTURE_UOW_TIMEOUT_MS`,
    /// `PLAYTURE_UOW_BEHAVIOR`, `PLAYTURE_LOG`, `PLAYTURE_LOG_DIR`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(v) = parse_var(&lookup, "PLAYTURE_DB_MIN_CONNECTIONS")? {
            config.database.min_connections = v;
        }
        if let Some(v) = parse_var(&lookup, "PLAYTURE_DB_MAX_CONNECTIONS")? {
            config.database.max_connections = v;
        }
        if let Some(v) = parse_var(&lookup, "PLAYTURE_DB_ACQUIRE_TIMEOUT_MS")? {
            config.database.acquire_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PLAYTURE_DB_BUSY_TIMEOUT_MS")? {
            config.database.busy_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PLAYTURE_UOW_TIMEOUT_MS")? {
            config.unit_of_work.default_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PLAYTURE_UOW_BEHAVIOR")? {
            config.unit_of_work.behavior = v;
        }
        if let Some(filter) = lookup("PLAYTURE_LOG") {
            config.log.filter = filter;
        }
        if let Some(dir) = lookup("PLAYTURE_LOG_DIR") {
            config.log.dir = Some(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check bounds that would otherwise surface as confusing pool errors.
    pub fn validate(&self) -> Result<()> {
        let db = &self.database;
        if db.url.trim().is_empty() {
            return Err(Error::config("database url must not be empty"));
        }
        if db.max_connections == 0 {
            return Err(Error::config("max_connections must be at least 1"));
        }
        if db.min_connections > db.max_connections {
            return Err(Error::config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                db.min_connections, db.max_connections
            )));
        }
        if db.acquire_timeout_ms == 0 || self.unit_of_work.default_timeout_ms == 0 {
            return Err(Error::config("timeouts must be non-zero"));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("invalid {}={:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.database.min_connections, 5);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.unit_of_work.behavior, TxBehavior::Immediate);
        assert_eq!(config.unit_of_work.default_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("PLAYTURE_DB_MAX_CONNECTIONS", "4"),
            ("PLAYTURE_DB_MIN_CONNECTIONS", "1"),
            ("PLAYTURE_UOW_BEHAVIOR", "deferred"),
            ("PLAYTURE_LOG_DIR", "/var/log/playture"),
        ]))
        .unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.unit_of_work.behavior, TxBehavior::Deferred);
        assert_eq!(config.log.dir.as_deref(), Some("/var/log/playture"));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = StoreConfig::from_lookup(lookup_from(&[("PLAYTURE_DB_MAX_CONNECTIONS", "ten")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let err = StoreConfig::from_lookup(lookup_from(&[
            ("PLAYTURE_DB_MIN_CONNECTIONS", "8"),
            ("PLAYTURE_DB_MAX_CONNECTIONS", "2"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"database": {"url": "sqlite:x.db"}}"#).unwrap();
        assert_eq!(config.database.url, "sqlite:x.db");
        assert_eq!(config.database.max_connections, 10);
    }
}
