//! Database module.
//!
//! This module provides the persistence layer using SQLite with sqlx.
//! It owns the connection pool, the transaction handle used by the unit of
//! work, models, repositories and the schema migrations.

pub mod models;
pub mod query;
pub mod repositories;
pub mod scope;
pub mod time;
pub mod unit_of_work;

pub use query::{FieldValue, Pagination};
pub use scope::TxScope;
pub use unit_of_work::{UnitOfWork, WorkFuture};

use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::TxStage;
use crate::{Error, Result};

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default cache size (negative means KiB, so this is 64MB).
const DEFAULT_CACHE_SIZE_KB: i32 = -64000;

async fn apply_per_connection_pragmas(
    conn: &mut sqlx::SqliteConnection,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(&format!("PRAGMA cache_size = {}", DEFAULT_CACHE_SIZE_KB))
        .execute(&mut *conn)
        .await?;

    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Owned handle to the process-wide connection pool.
///
/// Created once at startup and closed at shutdown. Clones share the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open the pool described by `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            // WAL lets readers proceed while a unit of work holds the write lock
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout())
            // Order <-> job references are enforced by the store
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .after_connect(|conn, _meta| {
                Box::pin(async move { apply_per_connection_pragmas(&mut *conn).await })
            })
            .connect_with(connect_options)
            .await?;

        ensure_wal_mode(&pool).await?;

        info!(
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "Database pool initialized"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Apply all pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        run_migrations(&self.pool).await
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

async fn ensure_wal_mode(pool: &DbPool) -> Result<()> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?;
    let mode: String = row.get(0);
    if mode != "wal" && mode != "memory" {
        warn!("journal_mode was '{}', expected 'wal'; re-setting", mode);
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// How a unit of work opens its transaction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum TxBehavior {
    /// `BEGIN`: the write lock is taken on the first write.
    Deferred,
    /// `BEGIN IMMEDIATE`: the write lock is taken up front, so two units of
    /// work can never both read and then race to upgrade.
    #[default]
    Immediate,
}

impl TxBehavior {
    fn begin_sql(&self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN",
            Self::Immediate => "BEGIN IMMEDIATE",
        }
    }
}

/// Acquire a pooled connection and open a transaction on it.
pub async fn begin(pool: &DbPool, behavior: TxBehavior) -> Result<DbTransaction> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| Error::from_tx(TxStage::Acquire, e))?;
    sqlx::query(behavior.begin_sql())
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::from_tx(TxStage::Begin, e))?;
    Ok(DbTransaction::new(conn))
}

/// A manually managed transaction on a dedicated pooled connection.
///
/// If dropped without `commit` or `rollback` (for example when the owning
/// future is abandoned on timeout) the connection is closed instead of being
/// returned to the pool, and SQLite discards the open transaction.
pub struct DbTransaction {
    conn: sqlx::pool::PoolConnection<Sqlite>,
    finished: bool,
}

impl DbTransaction {
    fn new(conn: sqlx::pool::PoolConnection<Sqlite>) -> Self {
        Self {
            conn,
            finished: false,
        }
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> Result<()> {
        sqlx::query("COMMIT")
            .execute(&mut *self.conn)
            .await
            .map_err(|e| Error::from_tx(TxStage::Commit, e))?;
        self.finished = true;
        Ok(())
    }

    /// Roll the transaction back, returning the raw driver error on failure so
    /// the caller can attach it to the error that triggered the rollback.
    pub async fn rollback(mut self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }
}

impl std::ops::Deref for DbTransaction {
    type Target = sqlx::SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for DbTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for DbTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.close_on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_and_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("t.db").display());
        let mut config = DatabaseConfig::with_url(url);
        config.min_connections = 1;

        let db = Database::connect(&config).await.unwrap();
        db.migrate().await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(names.contains(&"jobs"));
        assert!(names.contains(&"orders"));

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(mode.0, "wal");

        db.close().await;
        assert!(db.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("t.db").display());
        let mut config = DatabaseConfig::with_url(url);
        config.min_connections = 1;
        let db = Database::connect(&config).await.unwrap();

        sqlx::query("CREATE TABLE t (v INTEGER)")
            .execute(db.pool())
            .await
            .unwrap();

        {
            let mut tx = begin(db.pool(), TxBehavior::Immediate).await.unwrap();
            sqlx::query("INSERT INTO t (v) VALUES (1)")
                .execute(&mut *tx)
                .await
                .unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_behavior_from_str() {
        assert_eq!(TxBehavior::from_str("IMMEDIATE").unwrap(), TxBehavior::Immediate);
        assert_eq!(TxBehavior::from_str("deferred").unwrap(), TxBehavior::Deferred);
        assert!(TxBehavior::from_str("exclusive").is_err());
    }
}
