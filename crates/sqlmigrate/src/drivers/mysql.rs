//! MySQL driver: mysql_async pool, `?` placeholders, named locks via
//! `GET_LOCK`/`RELEASE_LOCK`. MySQL has no schemas-within-a-database, so
//! the schema argument is ignored by every statement.

use async_trait::async_trait;
use futures::future::BoxFuture;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Params, Pool, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::{Adapter, Notifier, TxnSupport, VERSIONS_TABLE};
use crate::db::{DbConn, DbPool, DbTxn, Param, Scalar};
use crate::dsn::swap_database;
use crate::error::{MigrateError, Result};
use crate::lock::LOCK_POLL_INTERVAL;

/// Always-present administrative database.
const ADMIN_DATABASE: &str = "mysql";

pub(crate) fn adapter() -> Adapter {
    Adapter {
        create_versions_table,
        select_existing_versions,
        insert_new_version,
        delete_old_version,
        ping_query: "SELECT 1",
        create_database_query: Some(create_database_query),
        create_schema_query: None,
        base_database_url: Some(base_database_url),
        txn_support: TxnSupport::Database,
        harmless_commit_error: None,
        supports_locking: true,
        acquire_lock: Some(acquire_lock),
        release_lock: Some(release_lock),
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

fn create_database_query(name: &str) -> String {
    format!("CREATE DATABASE {name}")
}

fn base_database_url(database_url: &str) -> Result<(String, String)> {
    Ok(swap_database(database_url, ADMIN_DATABASE))
}

fn acquire_lock<'a>(
    conn: &'a mut dyn DbConn,
    lock_key: &'a str,
    notify: &'a Notifier,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        loop {
            // GET_LOCK answers 1 (acquired), 0 (held elsewhere), or NULL.
            let got = conn
                .query_scalar("SELECT GET_LOCK(?, 0)", &[Param::Text(lock_key)])
                .await?;
            if got.truthy() {
                return Ok(());
            }
            notify.emit("Waiting for migration lock...");
            tokio::select! {
                _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
                _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
            }
        }
    })
}

fn release_lock<'a>(conn: &'a mut dyn DbConn, lock_key: &'a str) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        conn.execute("SELECT RELEASE_LOCK(?)", &[Param::Text(lock_key)])
            .await
            .map(|_| ())
    })
}

fn connect(database_url: String) -> BoxFuture<'static, Result<Box<dyn DbPool>>> {
    Box::pin(async move {
        let opts =
            Opts::from_url(&database_url).map_err(|e| MigrateError::db(e, "parsing mysql url"))?;
        let pool = Pool::new(opts);

        // Fail fast on unreachable servers instead of on first statement.
        let conn = pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::db(e, "connecting to mysql"))?;
        drop(conn);

        Ok(Box::new(MysqlPool { pool }) as Box<dyn DbPool>)
    })
}

fn to_values(params: &[Param<'_>]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(
        params
            .iter()
            .map(|p| match p {
                Param::Text(s) => Value::from(*s),
                Param::Int(i) => Value::from(*i),
            })
            .collect(),
    )
}

struct MysqlPool {
    pool: Pool,
}

impl MysqlPool {
    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::db(e, "getting mysql connection"))
    }
}

#[async_trait(?Send)]
impl DbPool for MysqlPool {
    async fn exec_batch(&self, sql: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.query_drop(sql)
            .await
            .map_err(|e| MigrateError::db(e, "executing statement batch"))
    }

    async fn execute(&self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.exec_drop(sql, to_values(params))
            .await
            .map_err(|e| MigrateError::db(e, "executing statement"))?;
        Ok(conn.affected_rows())
    }

    async fn query_strings(&self, sql: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(String,)> = conn
            .query(sql)
            .await
            .map_err(|e| MigrateError::db(e, "querying versions"))?;
        Ok(rows.into_iter().map(|(version,)| version).collect())
    }

    async fn ping(&self, sql: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.query_drop(sql)
            .await
            .map_err(|e| MigrateError::db(e, "pinging mysql"))
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn DbTxn + 'a>> {
        let mut conn = self.conn().await?;
        conn.query_drop("BEGIN")
            .await
            .map_err(|e| MigrateError::db(e, "beginning transaction"))?;
        Ok(Box::new(MysqlTxn { conn }))
    }

    async fn pin(&self) -> Result<Box<dyn DbConn>> {
        let conn = self.conn().await?;
        Ok(Box::new(MysqlConn { conn }))
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            debug!("error while closing mysql pool: {e}");
        }
    }
}

/// Transaction over a pooled connection driven by explicit
/// BEGIN/COMMIT/ROLLBACK statements.
struct MysqlTxn {
    conn: Conn,
}

#[async_trait(?Send)]
impl DbTxn for MysqlTxn {
    async fn exec_batch(&mut self, sql: &str) -> Result<()> {
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| MigrateError::db(e, "executing statement batch"))
    }

    async fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        self.conn
            .exec_drop(sql, to_values(params))
            .await
            .map_err(|e| MigrateError::db(e, "executing statement"))?;
        Ok(self.conn.affected_rows())
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn
            .query_drop("COMMIT")
            .await
            .map_err(|e| MigrateError::db(e, "committing"))
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn
            .query_drop("ROLLBACK")
            .await
            .map_err(|e| MigrateError::db(e, "rolling back"))
    }
}

struct MysqlConn {
    conn: Conn,
}

#[async_trait(?Send)]
impl DbConn for MysqlConn {
    async fn query_scalar(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Scalar> {
        let row: Option<(Option<i64>,)> = self
            .conn
            .exec_first(sql, to_values(params))
            .await
            .map_err(|e| MigrateError::db(e, "running lock probe"))?;
        Ok(match row {
            Some((Some(value),)) => Scalar::Int(value),
            _ => Scalar::Null,
        })
    }

    async fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        self.conn
            .exec_drop(sql, to_values(params))
            .await
            .map_err(|e| MigrateError::db(e, "executing on pinned connection"))?;
        Ok(self.conn.affected_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_statements_ignore_schema() {
        assert_eq!(
            create_versions_table(Some("audit")),
            "CREATE TABLE IF NOT EXISTS dbmigrate_versions (version char(14) NOT NULL PRIMARY KEY)"
        );
        assert_eq!(
            insert_new_version(None),
            "INSERT INTO dbmigrate_versions (version) VALUES (?)"
        );
        assert_eq!(
            delete_old_version(None),
            "DELETE FROM dbmigrate_versions WHERE version = ?"
        );
    }

    #[test]
    fn test_base_database_url_handles_dsn_forms() {
        let cases = [
            (
                "root:password@tcp(127.0.0.1:65500)/foobar?multiStatements=true",
                "root:password@tcp(127.0.0.1:65500)/mysql?multiStatements=true",
                "foobar",
            ),
            (
                "root:password@tcp(127.0.0.1:65500)/foobar",
                "root:password@tcp(127.0.0.1:65500)/mysql",
                "foobar",
            ),
            (
                "tcp(127.0.0.1:65500)/foobar",
                "tcp(127.0.0.1:65500)/mysql",
                "foobar",
            ),
        ];
        for (given, expected_url, expected_name) in cases {
            let (admin, name) = base_database_url(given).unwrap();
            assert_eq!(admin, expected_url);
            assert_eq!(name, expected_name);
        }
    }

    #[test]
    fn test_adapter_capabilities() {
        let adapter = adapter();
        assert!(adapter.supports_locking);
        assert!(adapter.create_schema_query.is_none());
        assert!(adapter.harmless_commit_error.is_none());
        assert_eq!(adapter.txn_support, TxnSupport::Database);
    }

    #[test]
    fn test_to_values() {
        assert!(matches!(to_values(&[]), Params::Empty));
        match to_values(&[Param::Text("v1"), Param::Int(7)]) {
            Params::Positional(values) => {
                assert_eq!(values.len(), 2);
                assert_eq!(values[1], Value::Int(7));
            }
            other => panic!("expected positional params, got {other:?}"),
        }
    }
}
