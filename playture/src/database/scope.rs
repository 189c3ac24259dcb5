//! Where a repository call runs: on the pool or inside a caller's transaction.

use sqlx::query::{Query, QueryAs, QueryScalar};
use sqlx::sqlite::{SqliteArguments, SqliteQueryResult, SqliteRow};
use sqlx::{FromRow, Sqlite, SqliteConnection, SqlitePool};

/// Execution scope for a repository operation.
///
/// Repositories never begin, commit or roll back. With `Autocommit` each
/// statement is its own transaction on a pooled connection; with
/// `Transaction` the statement joins whatever the caller has open.
pub enum TxScope<'c> {
    Autocommit,
    Transaction(&'c mut SqliteConnection),
}

impl<'c> TxScope<'c> {
    /// Reborrow for a nested call without giving up this scope.
    pub fn reborrow(&mut self) -> TxScope<'_> {
        match self {
            Self::Autocommit => TxScope::Autocommit,
            Self::Transaction(conn) => TxScope::Transaction(&mut **conn),
        }
    }
}

impl<'c> From<&'c mut SqliteConnection> for TxScope<'c> {
    fn from(conn: &'c mut SqliteConnection) -> Self {
        Self::Transaction(conn)
    }
}

impl std::fmt::Debug for TxScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Autocommit => f.write_str("Autocommit"),
            Self::Transaction(_) => f.write_str("Transaction"),
        }
    }
}

pub(crate) async fn execute<'q>(
    pool: &SqlitePool,
    scope: TxScope<'_>,
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
) -> Result<SqliteQueryResult, sqlx::Error> {
    match scope {
        TxScope::Autocommit => query.execute(pool).await,
        TxScope::Transaction(conn) => query.execute(conn).await,
    }
}

pub(crate) async fn fetch_optional<'q, O>(
    pool: &SqlitePool,
    scope: TxScope<'_>,
    query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
) -> Result<Option<O>, sqlx::Error>
where
    O: Send + Unpin + for<'r> FromRow<'r, SqliteRow>,
{
    match scope {
        TxScope::Autocommit => query.fetch_optional(pool).await,
        TxScope::Transaction(conn) => query.fetch_optional(conn).await,
    }
}

pub(crate) async fn fetch_all<'q, O>(
    pool: &SqlitePool,
    scope: TxScope<'_>,
    query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
) -> Result<Vec<O>, sqlx::Error>
where
    O: Send + Unpin + for<'r> FromRow<'r, SqliteRow>,
{
    match scope {
        TxScope::Autocommit => query.fetch_all(pool).await,
        TxScope::Transaction(conn) => query.fetch_all(conn).await,
    }
}

pub(crate) async fn fetch_scalar<'q, O>(
    pool: &SqlitePool,
    scope: TxScope<'_>,
    query: QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>,
) -> Result<O, sqlx::Error>
where
    O: Send + Unpin,
    (O,): for<'r> FromRow<'r, SqliteRow>,
{
    match scope {
        TxScope::Autocommit => query.fetch_one(pool).await,
        TxScope::Transaction(conn) => query.fetch_one(conn).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    #[tokio::test]
    async fn test_reborrow_keeps_transaction() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER)")
            .execute(&mut conn)
            .await
            .unwrap();
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();

        let mut scope = TxScope::from(&mut conn);
        for v in 0..2 {
            execute(&pool, scope.reborrow(), sqlx::query("INSERT INTO t (v) VALUES (?)").bind(v))
                .await
                .unwrap();
        }
        let count: i64 = fetch_scalar(&pool, scope, sqlx::query_scalar("SELECT COUNT(*) FROM t"))
            .await
            .unwrap();
        assert_eq!(count, 2);

        assert_eq!(format!("{:?}", TxScope::Autocommit), "Autocommit");
    }
}
