//! Object-safe connection abstraction implemented by the driver bindings.
//!
//! The engine only ever talks to the database through these three traits:
//!
//! - [`DbPool`]: the shared connection pool for one target database
//! - [`DbTxn`]: a transaction (or a pass-through stand-in, see [`NoopTxn`])
//! - [`DbConn`]: a pinned connection that advisory-lock traffic lives on
//!
//! Migration file bodies go through `exec_batch` because they may contain
//! several `;`-separated statements; bookkeeping statements go through
//! `execute` with typed parameters.

use async_trait::async_trait;

use crate::adapter::{Adapter, TxnSupport};
use crate::error::Result;

/// A statement parameter. Version tokens bind as text; advisory-lock keys
/// bind as text or bigint depending on the dialect.
#[derive(Debug, Clone, Copy)]
pub enum Param<'a> {
    Text(&'a str),
    Int(i64),
}

/// Single-row, single-column probe result (advisory-lock answers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Null,
}

impl Scalar {
    /// True for `Bool(true)` and `Int(1)`, the two shapes in which
    /// `pg_try_advisory_lock` and `GET_LOCK` report success.
    pub fn truthy(self) -> bool {
        matches!(self, Scalar::Bool(true) | Scalar::Int(1))
    }
}

/// Connection pool for one target database.
#[async_trait(?Send)]
pub trait DbPool: Send + Sync {
    /// Run a migration file body; may contain multiple statements.
    async fn exec_batch(&self, sql: &str) -> Result<()>;

    /// Run a single parameterised statement; returns affected rows.
    async fn execute(&self, sql: &str, params: &[Param<'_>]) -> Result<u64>;

    /// Run a query returning one string column per row.
    async fn query_strings(&self, sql: &str) -> Result<Vec<String>>;

    /// Liveness probe; any returned rows are discarded.
    async fn ping(&self, sql: &str) -> Result<()>;

    /// Begin a database transaction on a dedicated connection.
    async fn begin<'a>(&'a self) -> Result<Box<dyn DbTxn + 'a>>;

    /// Pin a dedicated connection from the pool.
    async fn pin(&self) -> Result<Box<dyn DbConn>>;

    /// Release the pool.
    async fn close(&self);
}

/// A transaction over a dedicated connection.
#[async_trait(?Send)]
pub trait DbTxn: Send {
    async fn exec_batch(&mut self, sql: &str) -> Result<()>;
    async fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}

/// A pinned connection for advisory-lock traffic.
#[async_trait(?Send)]
pub trait DbConn: Send {
    /// Single-row, single-column probe.
    async fn query_scalar(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Scalar>;

    /// Fire-and-forget statement on the pinned connection.
    async fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64>;
}

/// Pass-through "transaction" for databases without transactions (CQL).
/// Execs route straight to the pool; commit and rollback are no-ops.
pub struct NoopTxn<'a> {
    pool: &'a dyn DbPool,
}

impl<'a> NoopTxn<'a> {
    pub fn new(pool: &'a dyn DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait(?Send)]
impl DbTxn for NoopTxn<'_> {
    async fn exec_batch(&mut self, sql: &str) -> Result<()> {
        self.pool.exec_batch(sql).await
    }

    async fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        self.pool.execute(sql, params).await
    }

    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Begin a transaction the way the adapter says to: a real one from the
/// pool, or a pass-through wrapper so the runner code paths stay uniform.
pub(crate) async fn begin_tx<'a>(
    adapter: &Adapter,
    pool: &'a dyn DbPool,
) -> Result<Box<dyn DbTxn + 'a>> {
    match adapter.txn_support {
        TxnSupport::Database => pool.begin().await,
        TxnSupport::PassThrough => Ok(Box::new(NoopTxn::new(pool))),
    }
}
