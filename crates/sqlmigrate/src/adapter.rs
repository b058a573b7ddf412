//! The driver adapter record and the process-wide registry.
//!
//! An [`Adapter`] bundles everything the engine needs to know about one
//! database backend: the SQL-dialect fragments for the bookkeeping table,
//! the transaction style, the advisory-lock protocol, URL surgery for the
//! administrative database, and the connection backend. Capabilities the
//! backend lacks are `None` fields, not subtypes.
//!
//! `postgres`, `mysql`, `sqlite3` and `cql` are registered out of the box;
//! [`register`] adds or replaces drivers at startup.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::db::{DbConn, DbPool};
use crate::error::{MigrateError, Result};

/// Name of the bookkeeping table, one row per applied up-migration.
pub const VERSIONS_TABLE: &str = "dbmigrate_versions";

/// Progress hook for user-facing notifications: applied filenames, lock
/// waits, warnings. Distinct from `tracing`, which carries engine
/// diagnostics only.
#[derive(Clone)]
pub struct Notifier(Arc<dyn Fn(&str) + Send + Sync>);

impl Notifier {
    pub fn new(hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    /// A notifier that discards everything.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, message: &str) {
        (self.0.as_ref())(message)
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::silent()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Notifier(..)")
    }
}

/// Bookkeeping statement for an optional schema.
pub type StatementFn = fn(Option<&str>) -> String;

/// DDL for a database or schema name.
pub type NameFn = fn(&str) -> String;

/// Rewrite a database URL into `(admin_url, database_name)` where the admin
/// URL points at the backend's always-present administrative database.
pub type BaseUrlFn = fn(&str) -> Result<(String, String)>;

/// Open a connection pool for a database URL.
pub type ConnectFn = fn(String) -> BoxFuture<'static, Result<Box<dyn DbPool>>>;

/// Block on the pinned connection until the advisory lock is held, emitting
/// a progress notification on each wait and honouring cancellation.
pub type AcquireLockFn = for<'a> fn(
    &'a mut dyn DbConn,
    &'a str,
    &'a Notifier,
    &'a CancellationToken,
) -> BoxFuture<'a, Result<()>>;

/// Release the advisory lock; callers treat errors as best-effort.
pub type ReleaseLockFn = for<'a> fn(&'a mut dyn DbConn, &'a str) -> BoxFuture<'a, Result<()>>;

/// Whether the backend has real transactions or needs a pass-through
/// wrapper whose commit/rollback are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnSupport {
    Database,
    PassThrough,
}

/// Everything the engine needs to know about one database backend.
#[derive(Clone)]
pub struct Adapter {
    /// Idempotent DDL for the bookkeeping table.
    pub create_versions_table: StatementFn,
    /// All applied version tokens, ascending.
    pub select_existing_versions: StatementFn,
    /// Parameterised insert; placeholder style is dialect-specific.
    pub insert_new_version: StatementFn,
    /// Parameterised delete.
    pub delete_old_version: StatementFn,
    /// Trivial liveness check; empty means no readiness-polling support.
    pub ping_query: &'static str,
    /// `None` means the driver cannot create databases.
    pub create_database_query: Option<NameFn>,
    /// `None` means the driver cannot create schemas.
    pub create_schema_query: Option<NameFn>,
    /// `None` means no admin operations (create-db, server-ready).
    pub base_database_url: Option<BaseUrlFn>,
    pub txn_support: TxnSupport,
    /// Commit error text whitelisted as success (a migration file that
    /// committed the transaction itself already made the work durable).
    pub harmless_commit_error: Option<&'static str>,
    /// False means a run requires the explicit no-lock opt-out.
    pub supports_locking: bool,
    pub acquire_lock: Option<AcquireLockFn>,
    pub release_lock: Option<ReleaseLockFn>,
    /// Built-in connection backend; `None` for record-only drivers whose
    /// pool arrives through `Migrator::with_pool`.
    pub connect: Option<ConnectFn>,
}

/// Schema-qualify `name` when a schema is set.
pub(crate) fn fq_name(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(s) if !s.is_empty() => format!("{s}.{name}"),
        _ => name.to_string(),
    }
}

fn registry() -> &'static RwLock<HashMap<String, Adapter>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Adapter>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(crate::drivers::builtins()))
}

/// Register a driver adapter under `name`, replacing any existing entry.
pub fn register(name: impl Into<String>, adapter: Adapter) {
    let mut map = registry().write().unwrap_or_else(|e| e.into_inner());
    map.insert(name.into(), adapter);
}

/// Look up the adapter for `driver_name`.
pub fn adapter_for(driver_name: &str) -> Result<Adapter> {
    let map = registry().read().unwrap_or_else(|e| e.into_inner());
    map.get(driver_name)
        .cloned()
        .ok_or_else(|| MigrateError::UnknownDriver(driver_name.to_string()))
}
