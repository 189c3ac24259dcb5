//! Transaction boundary for multi-statement writes.
//!
//! A [`UnitOfWork`] runs a closure against one transaction on one pooled
//! connection, then commits if the closure succeeded and rolls back if it
//! failed. The closure receives the connection and passes it to repository
//! calls as [`TxScope::Transaction`](crate::database::TxScope).
//!
//! ```ignore
//! let jobs = jobs.clone();
//! uow.run(Duration::from_secs(5), move |conn| {
//!     Box::pin(async move {
//!         let mut job = jobs.find_by_id(&id, TxScope::from(&mut *conn)).await?;
//!         job.set_status(JobStatus::Cancelled);
//!         jobs.update(&job, TxScope::from(&mut *conn)).await
//!     })
//! })
//! .await?;
//! ```

use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::SqliteConnection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DbPool, TxBehavior, begin};
use crate::config::UnitOfWorkConfig;
use crate::{Error, Result};

/// Future returned by unit-of-work closures, borrowing the transaction's
/// connection for `'c`.
pub type WorkFuture<'c, T> = BoxFuture<'c, Result<T>>;

tokio::task_local! {
    static IN_UNIT_OF_WORK: ();
}

/// Runs closures inside a single atomic, deadline-bounded transaction.
///
/// Units do not nest. SQLite admits one writer at a time, so a second
/// transaction opened from inside a running closure would wait on the outer
/// one's lock until its deadline. Such a `run` fails immediately with
/// [`Error::NestedUnitOfWork`]; the closure should reuse the connection it was
/// given instead. Nothing is retried.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    pool: DbPool,
    behavior: TxBehavior,
    default_timeout: Duration,
}

impl UnitOfWork {
    pub fn new(pool: DbPool) -> Self {
        Self::from_config(pool, &UnitOfWorkConfig::default())
    }

    pub fn from_config(pool: DbPool, config: &UnitOfWorkConfig) -> Self {
        Self {
            pool,
            behavior: config.behavior,
            default_timeout: config.default_timeout(),
        }
    }

    pub fn with_behavior(mut self, behavior: TxBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn behavior(&self) -> TxBehavior {
        self.behavior
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `work` in one transaction, bounded by `timeout`.
    ///
    /// The deadline covers acquiring the connection, the closure and the
    /// commit. When it passes, the in-flight work is dropped, its connection
    /// is closed rather than returned to the pool (which discards the open
    /// transaction) and [`Error::Timeout`] is returned.
    ///
    /// Called from inside another unit's closure it returns
    /// [`Error::NestedUnitOfWork`] without touching the pool.
    pub async fn run<T, F>(&self, timeout: Duration, work: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> WorkFuture<'c, T> + Send,
    {
        if IN_UNIT_OF_WORK.try_with(|_| ()).is_ok() {
            warn!("Unit of work started inside another unit of work");
            return Err(Error::NestedUnitOfWork);
        }

        let scoped = IN_UNIT_OF_WORK.scope((), self.execute(work));
        match tokio::time::timeout(timeout, scoped).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Unit of work timed out");
                Err(Error::Timeout { after: timeout })
            }
        }
    }

    /// [`run`](Self::run) with the configured default deadline.
    pub async fn run_default<T, F>(&self, work: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> WorkFuture<'c, T> + Send,
    {
        self.run(self.default_timeout, work).await
    }

    /// [`run`](Self::run) that is also abandoned when `cancel` fires.
    pub async fn run_cancellable<T, F>(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        work: F,
    ) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> WorkFuture<'c, T> + Send,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Unit of work cancelled");
                Err(Error::Cancelled)
            }
            result = self.run(timeout, work) => result,
        }
    }

    async fn execute<T, F>(&self, work: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> WorkFuture<'c, T> + Send,
    {
        let mut tx = begin(&self.pool, self.behavior).await?;
        debug!(behavior = %self.behavior, "Transaction started");

        match work(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                debug!("Transaction committed");
                Ok(value)
            }
            Err(cause) => match tx.rollback().await {
                Ok(()) => {
                    debug!(error = %cause, "Transaction rolled back");
                    Err(cause)
                }
                Err(rollback) => {
                    warn!(error = %cause, rollback_error = %rollback, "Transaction rollback failed");
                    Err(Error::RollbackFailed {
                        cause: Box::new(cause),
                        rollback,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::Database;
    use crate::error::TxStage;

    async fn setup() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("uow.db").display());
        let mut config = DatabaseConfig::with_url(url);
        config.min_connections = 1;
        let db = Database::connect(&config).await.unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER NOT NULL UNIQUE)")
            .execute(db.pool())
            .await
            .unwrap();
        (dir, db)
    }

    async fn count(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_returns_value() {
        let (_dir, db) = setup().await;
        let uow = UnitOfWork::new(db.pool().clone());

        let value = uow
            .run(Duration::from_secs(5), |conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO t (v) VALUES (1), (2)")
                        .execute(&mut *conn)
                        .await?;
                    Ok(42)
                })
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(count(&db).await, 2);
    }

    #[tokio::test]
    async fn test_error_rolls_back_earlier_writes() {
        let (_dir, db) = setup().await;
        let uow = UnitOfWork::new(db.pool().clone());

        let err = uow
            .run(Duration::from_secs(5), |conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO t (v) VALUES (1)")
                        .execute(&mut *conn)
                        .await?;
                    Err::<(), _>(Error::validation("second write refused"))
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_writes() {
        let (_dir, db) = setup().await;
        let uow = UnitOfWork::new(db.pool().clone());

        let err = uow
            .run(Duration::from_millis(100), |conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO t (v) VALUES (1)")
                        .execute(&mut *conn)
                        .await?;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_dir, db) = setup().await;
        let uow = UnitOfWork::new(db.pool().clone());
        let token = CancellationToken::new();
        token.cancel();

        let err = uow
            .run_cancellable(&token, Duration::from_secs(5), |_conn| {
                Box::pin(async move { Ok(()) })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_during_work_discards_writes() {
        let (_dir, db) = setup().await;
        let uow = UnitOfWork::new(db.pool().clone());
        let token = CancellationToken::new();
        let trigger = token.clone();

        let err = uow
            .run_cancellable(&token, Duration::from_secs(5), move |conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO t (v) VALUES (7)")
                        .execute(&mut *conn)
                        .await?;
                    trigger.cancel();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_nested_run_is_rejected() {
        let (_dir, db) = setup().await;
        let uow = UnitOfWork::new(db.pool().clone());
        assert_eq!(uow.behavior(), TxBehavior::Immediate);
        let inner = uow.clone();

        let started = std::time::Instant::now();
        let err = uow
            .run(Duration::from_secs(5), move |conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO t (v) VALUES (1)")
                        .execute(&mut *conn)
                        .await?;
                    inner
                        .run(Duration::from_secs(5), |conn| {
                            Box::pin(async move {
                                sqlx::query("INSERT INTO t (v) VALUES (2)")
                                    .execute(&mut *conn)
                                    .await?;
                                Ok(())
                            })
                        })
                        .await
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NestedUnitOfWork));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(count(&db).await, 0);

        // the flag does not outlive the outer unit
        uow.run(Duration::from_secs(5), |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO t (v) VALUES (3)")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .await
        .unwrap();
        assert_eq!(count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_reports_both_errors() {
        let (_dir, db) = setup().await;
        let uow = UnitOfWork::new(db.pool().clone());

        let err = uow
            .run(Duration::from_secs(5), |conn| {
                Box::pin(async move {
                    sqlx::query("ROLLBACK").execute(&mut *conn).await?;
                    Err::<(), _>(Error::validation("business cause"))
                })
            })
            .await
            .unwrap_err();

        match err {
            Error::RollbackFailed { cause, rollback } => {
                assert!(matches!(*cause, Error::Validation(ref m) if m == "business cause"));
                assert!(rollback.to_string().contains("no transaction is active"));
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported_as_commit_stage() {
        let (_dir, db) = setup().await;
        let uow = UnitOfWork::new(db.pool().clone());

        let err = uow
            .run(Duration::from_secs(5), |conn| {
                Box::pin(async move {
                    sqlx::query("COMMIT").execute(&mut *conn).await?;
                    Ok(1)
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Transaction {
                stage: TxStage::Commit,
                ..
            }
        ));
        assert!(!err.is_constraint_violation());
        assert!(err.to_string().contains("commit"));
    }

    #[tokio::test]
    async fn test_constraint_error_inside_work_propagates() {
        let (_dir, db) = setup().await;
        let uow = UnitOfWork::new(db.pool().clone());

        let err = uow
            .run(Duration::from_secs(5), |conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO t (v) VALUES (1)")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("INSERT INTO t (v) VALUES (1)")
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| Error::from_query("insert", e))?;
                    Ok(())
                })
            })
            .await
            .unwrap_err();

        assert!(err.is_constraint_violation());
        assert_eq!(count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_default_timeout_from_config() {
        let (_dir, db) = setup().await;
        let config = UnitOfWorkConfig {
            default_timeout_ms: 250,
            behavior: TxBehavior::Deferred,
        };
        let uow = UnitOfWork::from_config(db.pool().clone(), &config);
        assert_eq!(uow.default_timeout(), Duration::from_millis(250));
        assert_eq!(uow.behavior(), TxBehavior::Deferred);

        let value = uow
            .run_default(|_conn| Box::pin(async move { Ok("done") }))
            .await
            .unwrap();
        assert_eq!(value, "done");
    }
}
