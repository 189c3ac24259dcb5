//! Logging setup with a reloadable filter.
//!
//! This module provides:
//! - Runtime log level changes via `tracing_subscriber::reload`
//! - Optional daily-rolling log files with retention cleanup
//! - Local timezone timestamps for logs

use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::config::LogConfig;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "playture=info,sqlx=warn";

/// Rolling log file name prefix; files are suffixed with `.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "playture.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Timer that formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle to the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    fn new(handle: FilterHandle, log_dir: Option<PathBuf>) -> Self {
        Self { handle, log_dir }
    }

    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the active filter, e.g. `"playture=debug,sqlx=info"`.
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let new_filter = parse_filter(directive)?;

        self.handle
            .reload(new_filter)
            .map_err(|e| Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    /// Directory receiving log files, if file logging is enabled.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Delete rolled log files older than the retention period.
    pub async fn cleanup_old_logs(&self) -> Result<usize> {
        match &self.log_dir {
            Some(dir) => cleanup_old_logs(dir, LOG_RETENTION_DAYS).await,
            None => Ok(0),
        }
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| Error::config(format!("Invalid filter directive '{}': {}", directive, e)))
}

/// Delete `playture.log.YYYY-MM-DD` files dated before the cutoff.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let date_str = match path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|n| n.strip_prefix('.'))
        {
            Some(date) => date,
            None => continue,
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete old log file");
            } else {
                deleted_count += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.filter` when set. Keep the returned guard
/// alive for the life of the process or buffered file output is lost.
pub fn init_logging(config: &LogConfig) -> Result<(Arc<LoggingConfig>, Option<WorkerGuard>)> {
    let initial_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&config.filter)?,
    };
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    let (file_layer, guard, log_dir) = match &config.dir {
        Some(dir) => {
            let log_path = PathBuf::from(dir);
            std::fs::create_dir_all(&log_path)?;

            let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard), Some(log_path))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok((Arc::new(LoggingConfig::new(filter_handle, log_dir)), guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("playture=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
        assert!(parse_filter(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let err = parse_filter("playture=loud").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_cleanup_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        let today = Local::now().date_naive();
        let old = today - chrono::Duration::days(30);

        let fresh = dir
            .path()
            .join(format!("{}.{}", LOG_FILE_PREFIX, today.format("%Y-%m-%d")));
        let stale = dir
            .path()
            .join(format!("{}.{}", LOG_FILE_PREFIX, old.format("%Y-%m-%d")));
        let unrelated = dir.path().join("notes.txt");
        for path in [&fresh, &stale, &unrelated] {
            std::fs::write(path, b"x").unwrap();
        }

        let deleted = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(fresh.exists());
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }
}
