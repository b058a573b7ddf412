//! SQLite driver: sqlx pool, `?` placeholders. A single-writer database
//! file has no server-side lock primitive, so runs require the explicit
//! no-lock opt-out.

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Sqlite;

use crate::adapter::{Adapter, TxnSupport, VERSIONS_TABLE};
use crate::db::{DbConn, DbPool, DbTxn, Param, Scalar};
use crate::error::{MigrateError, Result};

const POOL_SIZE: u32 = 4;

pub(crate) fn adapter() -> Adapter {
    Adapter {
        create_versions_table,
        select_existing_versions,
        insert_new_version,
        delete_old_version,
        ping_query: "SELECT 1",
        create_database_query: None,
        create_schema_query: None,
        base_database_url: None,
        txn_support: TxnSupport::Database,
        harmless_commit_error: None,
        supports_locking: false,
        acquire_lock: None,
        release_lock: None,
        connect: Some(connect),
    }
}

fn create_versions_table(_schema: Option<&str>) -> String {
    format!("CREATE TABLE IF NOT EXISTS {VERSIONS_TABLE} (version char(14) NOT NULL PRIMARY KEY)")
}

fn select_existing_versions(_schema: Option<&str>) -> String {
    format!("SELECT version FROM {VERSIONS_TABLE} ORDER BY version ASC")
}

fn insert_new_version(_schema: Option<&str>) -> String {
    format!("INSERT INTO {VERSIONS_TABLE} (version) VALUES (?)")
}

fn delete_old_version(_schema: Option<&str>) -> String {
    format!("DELETE FROM {VERSIONS_TABLE} WHERE version = ?")
}

fn connect(database_url: String) -> BoxFuture<'static, Result<Box<dyn DbPool>>> {
    Box::pin(async move {
        // Accept both `sqlite://path` URLs and bare filenames.
        let path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(&database_url);
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::db(e, "opening sqlite database"))?;
        Ok(Box::new(SqlitePool { pool }) as Box<dyn DbPool>)
    })
}

struct SqlitePool {
    pool: sqlx::SqlitePool,
}

fn bind_params<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [Param<'q>],
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    params.iter().fold(query, |q, p| match p {
        Param::Text(s) => q.bind(*s),
        Param::Int(i) => q.bind(*i),
    })
}

#[async_trait(?Send)]
impl DbPool for SqlitePool {
    async fn exec_batch(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| MigrateError::db(e, "executing statement batch"))
    }

    async fn execute(&self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrateError::db(e, "executing statement"))?;
        Ok(result.rows_affected())
    }

    async fn query_strings(&self, sql: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::db(e, "querying versions"))
    }

    async fn ping(&self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| MigrateError::db(e, "pinging sqlite"))
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn DbTxn + 'a>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MigrateError::db(e, "getting sqlite connection"))?;
        sqlx::raw_sql("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrateError::db(e, "beginning transaction"))?;
        Ok(Box::new(SqliteTxn { conn }))
    }

    async fn pin(&self) -> Result<Box<dyn DbConn>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MigrateError::db(e, "getting sqlite connection"))?;
        Ok(Box::new(SqliteConn { conn }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Transaction over a pooled connection driven by explicit
/// BEGIN/COMMIT/ROLLBACK statements.
struct SqliteTxn {
    conn: PoolConnection<Sqlite>,
}

#[async_trait(?Send)]
impl DbTxn for SqliteTxn {
    async fn exec_batch(&mut self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&mut *self.conn)
            .await
            .map(|_| ())
            .map_err(|e| MigrateError::db(e, "executing statement batch"))
    }

    async fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| MigrateError::db(e, "executing statement"))?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<()> {
        sqlx::raw_sql("COMMIT")
            .execute(&mut *self.conn)
            .await
            .map(|_| ())
            .map_err(|e| MigrateError::db(e, "committing"))
    }

    async fn rollback(&mut self) -> Result<()> {
        sqlx::raw_sql("ROLLBACK")
            .execute(&mut *self.conn)
            .await
            .map(|_| ())
            .map_err(|e| MigrateError::db(e, "rolling back"))
    }
}

struct SqliteConn {
    conn: PoolConnection<Sqlite>,
}

#[async_trait(?Send)]
impl DbConn for SqliteConn {
    async fn query_scalar(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Scalar> {
        let mut query = sqlx::query_scalar::<_, Option<i64>>(sql);
        for p in params {
            query = match p {
                Param::Text(s) => query.bind(*s),
                Param::Int(i) => query.bind(*i),
            };
        }
        let row = query
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| MigrateError::db(e, "running probe"))?;
        Ok(match row {
            Some(Some(value)) => Scalar::Int(value),
            _ => Scalar::Null,
        })
    }

    async fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| MigrateError::db(e, "executing on pinned connection"))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_adapter_capabilities() {
        let adapter = adapter();
        assert!(!adapter.supports_locking);
        assert!(adapter.acquire_lock.is_none());
        assert!(adapter.base_database_url.is_none());
        assert_eq!(adapter.txn_support, TxnSupport::Database);
    }

    #[test]
    fn test_sql_statements() {
        assert_eq!(
            insert_new_version(None),
            "INSERT INTO dbmigrate_versions (version) VALUES (?)"
        );
        assert_eq!(
            select_existing_versions(None),
            "SELECT version FROM dbmigrate_versions ORDER BY version ASC"
        );
    }

    #[tokio::test]
    async fn test_connect_roundtrip() {
        let dir = TempDir::new().unwrap();
        let url = dir.path().join("test.db").display().to_string();
        let pool = connect(url).await.unwrap();

        pool.exec_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .await
            .unwrap();
        pool.exec_batch(&create_versions_table(None)).await.unwrap();
        pool.execute(&insert_new_version(None), &[Param::Text("20240101120000")])
            .await
            .unwrap();
        let versions = pool
            .query_strings(&select_existing_versions(None))
            .await
            .unwrap();
        assert_eq!(versions, vec!["20240101120000"]);

        // Transactions roll back.
        let mut tx = pool.begin().await.unwrap();
        tx.execute(&insert_new_version(None), &[Param::Text("20240102120000")])
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        drop(tx);
        let versions = pool
            .query_strings(&select_existing_versions(None))
            .await
            .unwrap();
        assert_eq!(versions, vec!["20240101120000"]);

        pool.close().await;
    }
}
