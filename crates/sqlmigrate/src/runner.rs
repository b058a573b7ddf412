//! The migration engine: reconciliation, transaction-mode dispatch, locking.
//!
//! A [`Migrator`] is created per invocation and closed on exit. A run moves
//! through lock acquisition, bookkeeping load, mode validation and strategy
//! dispatch; teardown (lock release) runs on every exit path past
//! acquisition.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::{adapter_for, Adapter, Notifier, VERSIONS_TABLE};
use crate::catalog::{version_of, Catalog, Direction};
use crate::db::{begin_tx, DbConn, DbPool, Param};
use crate::dsn::sanitize_driver_url;
use crate::error::{MigrateError, Result};
use crate::lock::lock_id;
use crate::mode::{requires_no_txn, validate_txn_mode, TxnMode};
use crate::versions::VersionSet;

/// Options for a single up or down run.
#[derive(Clone, Default)]
pub struct MigrateOptions {
    /// Optional schema qualifying the bookkeeping table and the lock key.
    pub schema: Option<String>,
    /// Transaction granularity.
    pub mode: TxnMode,
    /// Skip cross-process locking.
    pub no_lock: bool,
    /// Progress hook: applied filenames, lock waits, warnings.
    pub notify: Notifier,
    /// Cooperative cancellation, checked in wait loops and between files.
    pub cancel: CancellationToken,
}

/// An open migration engine bound to one database.
///
/// Wraps the connection pool, the frozen catalogue, the bound driver and
/// database names (for lock-key derivation), and the adapter record.
pub struct Migrator {
    pool: Box<dyn DbPool>,
    driver_name: String,
    database_name: String,
    adapter: Adapter,
    catalog: Catalog,
}

impl Migrator {
    /// Connect to `database_url` and freeze the catalogue under `dir`.
    ///
    /// Fails when the driver cannot be discerned or is unknown, the
    /// directory cannot be walked, or the database is unreachable.
    pub async fn new(
        dir: impl AsRef<Path>,
        driver_name: &str,
        database_url: &str,
    ) -> Result<Self> {
        let (driver_name, database_url) = sanitize_driver_url(driver_name, database_url)?;
        let adapter = adapter_for(&driver_name)?;
        let connect = adapter.connect.ok_or_else(|| {
            MigrateError::Config(format!(
                "driver {driver_name:?} has no built-in connection backend; \
                 supply a pool via Migrator::with_pool or register an adapter with one"
            ))
        })?;
        let pool = connect(database_url.clone()).await?;
        Self::assemble(pool, dir, driver_name, database_url, adapter)
    }

    /// Wrap an already-open pool. For embedders and custom drivers whose
    /// adapter record carries no connection backend.
    pub fn with_pool(
        pool: Box<dyn DbPool>,
        dir: impl AsRef<Path>,
        driver_name: &str,
        database_url: &str,
    ) -> Result<Self> {
        let (driver_name, database_url) = sanitize_driver_url(driver_name, database_url)?;
        let adapter = adapter_for(&driver_name)?;
        Self::assemble(pool, dir, driver_name, database_url, adapter)
    }

    fn assemble(
        pool: Box<dyn DbPool>,
        dir: impl AsRef<Path>,
        driver_name: String,
        database_url: String,
        adapter: Adapter,
    ) -> Result<Self> {
        let database_name = adapter
            .base_database_url
            .and_then(|base| base(&database_url).ok())
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
            // No extractable name: the whole URL still yields a distinct lock key.
            .unwrap_or_else(|| database_url.clone());
        let catalog = Catalog::discover(dir.as_ref())?;
        Ok(Self {
            pool,
            driver_name,
            database_name,
            adapter,
            catalog,
        })
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Release the pool. The handle is per-invocation; call this on exit.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Versions present in the directory but not yet applied, ascending.
    pub async fn pending_versions(&self, schema: Option<&str>) -> Result<Vec<String>> {
        let applied = VersionSet::load(self.pool.as_ref(), &self.adapter, schema).await?;
        Ok(self
            .catalog
            .pending_up(&applied)
            .iter()
            .map(|f| version_of(f).to_string())
            .collect())
    }

    /// Apply all pending up-migrations in ascending order.
    pub async fn migrate_up(&self, opts: &MigrateOptions) -> Result<()> {
        self.run(Direction::Up, usize::MAX, opts).await
    }

    /// Un-apply at most `step` migrations in descending order.
    pub async fn migrate_down(&self, step: usize, opts: &MigrateOptions) -> Result<()> {
        self.run(Direction::Down, step, opts).await
    }

    async fn run(&self, direction: Direction, step: usize, opts: &MigrateOptions) -> Result<()> {
        let schema = opts.schema.as_deref();
        let mut lock_conn = self.acquire_lock(schema, opts).await?;
        let result = self.run_locked(direction, step, opts).await;
        self.release_lock(&mut lock_conn, schema).await;
        result
    }

    async fn run_locked(
        &self,
        direction: Direction,
        step: usize,
        opts: &MigrateOptions,
    ) -> Result<()> {
        self.warn_mysql_ddl(&opts.notify);

        let schema = opts.schema.as_deref();
        let applied = VersionSet::load(self.pool.as_ref(), &self.adapter, schema).await?;
        let files = match direction {
            Direction::Up => self.catalog.pending_up(&applied),
            Direction::Down => self.catalog.applicable_down(&applied, step),
        };
        debug!(count = files.len(), ?direction, "selected migration files");

        validate_txn_mode(&files, opts.mode)?;

        match opts.mode {
            TxnMode::All => self.apply_all(direction, &files, opts).await,
            TxnMode::PerFile => self.apply_per_file(direction, &files, opts).await,
            TxnMode::None => self.apply_unwrapped(direction, &files, opts).await,
        }
    }

    /// Behaviour table on `(no_lock, supports_locking)`: warn-and-skip,
    /// silent skip, pin-and-acquire, or hard failure.
    async fn acquire_lock(
        &self,
        schema: Option<&str>,
        opts: &MigrateOptions,
    ) -> Result<Option<Box<dyn DbConn>>> {
        if opts.no_lock {
            if self.adapter.supports_locking {
                opts.notify.emit(
                    "Warning: Running without cross-process locking. \
                     Concurrent migrations may cause corruption.",
                );
            }
            return Ok(None);
        }
        if !self.adapter.supports_locking {
            return Err(MigrateError::LockingNotSupported {
                driver: self.driver_name.clone(),
            });
        }
        let acquire = self.adapter.acquire_lock.ok_or_else(|| {
            MigrateError::Config(format!(
                "driver {:?} claims locking support but has no acquire routine",
                self.driver_name
            ))
        })?;

        let mut conn = self.pool.pin().await?;
        let key = lock_id(&self.database_name, schema, VERSIONS_TABLE);
        debug!(lock_key = %key, "acquiring migration lock");
        match acquire(conn.as_mut(), &key, &opts.notify, &opts.cancel).await {
            Ok(()) => Ok(Some(conn)),
            Err(MigrateError::Cancelled) => Err(MigrateError::Cancelled),
            Err(e) => Err(MigrateError::Lock(e.to_string())),
        }
    }

    /// Best-effort release; errors are logged and discarded. The pinned
    /// connection drops back to the pool afterwards.
    async fn release_lock(&self, lock_conn: &mut Option<Box<dyn DbConn>>, schema: Option<&str>) {
        let Some(conn) = lock_conn.as_mut() else {
            return;
        };
        let Some(release) = self.adapter.release_lock else {
            return;
        };
        let key = lock_id(&self.database_name, schema, VERSIONS_TABLE);
        if let Err(e) = release(conn.as_mut(), &key).await {
            debug!("failed to release migration lock: {e}");
        }
    }

    /// DDL on MySQL commits implicitly, so transaction modes are weak
    /// guarantees there; say so once per run.
    fn warn_mysql_ddl(&self, notify: &Notifier) {
        if self.driver_name != "mysql" {
            return;
        }
        notify.emit("Warning: MySQL does not support transactional DDL.");
        notify.emit("         DDL statements (CREATE, ALTER, DROP) commit implicitly.");
        notify.emit("         Transaction mode has limited effect on DDL-heavy migrations.");
    }

    fn bookkeeping_sql(&self, direction: Direction, schema: Option<&str>) -> String {
        match direction {
            Direction::Up => (self.adapter.insert_new_version)(schema),
            Direction::Down => (self.adapter.delete_old_version)(schema),
        }
    }

    fn bookkeeping_err(direction: Direction, version: &str, e: MigrateError) -> MigrateError {
        MigrateError::Bookkeeping {
            action: match direction {
                Direction::Up => "register",
                Direction::Down => "unregister",
            },
            version: version.to_string(),
            message: e.to_string(),
        }
    }

    fn progress_line(direction: Direction, applied: usize) -> String {
        match direction {
            Direction::Up => format!("{applied} migrations applied before failure."),
            Direction::Down => format!("{applied} migrations rolled back before failure."),
        }
    }

    /// Annotate a file failure and, when earlier files already committed,
    /// notify and record how many.
    fn file_failure(
        direction: Direction,
        name: &str,
        e: MigrateError,
        applied: usize,
        notify: &Notifier,
    ) -> MigrateError {
        let progress = (applied > 0).then(|| Self::progress_line(direction, applied));
        if let Some(line) = &progress {
            notify.emit(line);
        }
        MigrateError::Migration {
            file: name.to_string(),
            message: e.to_string(),
            progress,
        }
    }

    fn harmless_commit(&self, e: &MigrateError) -> bool {
        self.adapter
            .harmless_commit_error
            .is_some_and(|text| e.to_string().contains(text))
    }

    /// Mode `all`: one transaction around every selected file. Roll back on
    /// the first error, commit at the end.
    async fn apply_all(
        &self,
        direction: Direction,
        files: &[String],
        opts: &MigrateOptions,
    ) -> Result<()> {
        let bookkeeping = self.bookkeeping_sql(direction, opts.schema.as_deref());
        let mut tx = begin_tx(&self.adapter, self.pool.as_ref()).await?;

        for name in files {
            if opts.cancel.is_cancelled() {
                let _ = tx.rollback().await;
                return Err(MigrateError::Cancelled);
            }
            let version = version_of(name);
            let content = match self.catalog.content(name) {
                Ok(content) => content,
                Err(e) => {
                    let _ = tx.rollback().await;
                    return Err(e);
                }
            };
            if !is_blank(&content) {
                if let Err(e) = tx.exec_batch(&String::from_utf8_lossy(&content)).await {
                    let _ = tx.rollback().await;
                    return Err(MigrateError::Migration {
                        file: name.clone(),
                        message: e.to_string(),
                        progress: None,
                    });
                }
            }
            if let Err(e) = tx.execute(&bookkeeping, &[Param::Text(version)]).await {
                let _ = tx.rollback().await;
                return Err(Self::bookkeeping_err(direction, version, e));
            }
            opts.notify.emit(name);
        }

        match tx.commit().await {
            Ok(()) => Ok(()),
            Err(e) if self.harmless_commit(&e) => Ok(()),
            Err(e) => Err(MigrateError::db(e, "committing migration transaction")),
        }
    }

    /// Mode `per-file`: one transaction per file; `.no-db-txn.` files run
    /// on the pool directly. Earlier commits stay applied on failure.
    async fn apply_per_file(
        &self,
        direction: Direction,
        files: &[String],
        opts: &MigrateOptions,
    ) -> Result<()> {
        let bookkeeping = self.bookkeeping_sql(direction, opts.schema.as_deref());
        let mut applied = 0usize;

        for name in files {
            if opts.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let version = version_of(name);
            let content = self.catalog.content(name)?;

            if requires_no_txn(name) {
                if !is_blank(&content) {
                    if let Err(e) = self.pool.exec_batch(&String::from_utf8_lossy(&content)).await
                    {
                        return Err(Self::file_failure(
                            direction,
                            name,
                            e,
                            applied,
                            &opts.notify,
                        ));
                    }
                }
                self.pool
                    .execute(&bookkeeping, &[Param::Text(version)])
                    .await
                    .map_err(|e| Self::bookkeeping_err(direction, version, e))?;
            } else {
                let mut tx = begin_tx(&self.adapter, self.pool.as_ref()).await?;
                if !is_blank(&content) {
                    if let Err(e) = tx.exec_batch(&String::from_utf8_lossy(&content)).await {
                        let _ = tx.rollback().await;
                        return Err(Self::file_failure(
                            direction,
                            name,
                            e,
                            applied,
                            &opts.notify,
                        ));
                    }
                }
                if let Err(e) = tx.execute(&bookkeeping, &[Param::Text(version)]).await {
                    let _ = tx.rollback().await;
                    return Err(Self::bookkeeping_err(direction, version, e));
                }
                if let Err(e) = tx.commit().await {
                    if !self.harmless_commit(&e) {
                        return Err(MigrateError::db(
                            e,
                            format!("committing transaction for {name}"),
                        ));
                    }
                }
            }

            opts.notify.emit(name);
            applied += 1;
        }
        Ok(())
    }

    /// Mode `none`: no transaction wrapping at any level. Some engines
    /// still commit DDL atomically per statement; that is not hidden here.
    async fn apply_unwrapped(
        &self,
        direction: Direction,
        files: &[String],
        opts: &MigrateOptions,
    ) -> Result<()> {
        let bookkeeping = self.bookkeeping_sql(direction, opts.schema.as_deref());
        let mut applied = 0usize;

        for name in files {
            if opts.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let version = version_of(name);
            let content = self.catalog.content(name)?;

            if !is_blank(&content) {
                if let Err(e) = self.pool.exec_batch(&String::from_utf8_lossy(&content)).await {
                    return Err(Self::file_failure(direction, name, e, applied, &opts.notify));
                }
            }
            self.pool
                .execute(&bookkeeping, &[Param::Text(version)])
                .await
                .map_err(|e| Self::bookkeeping_err(direction, version, e))?;

            opts.notify.emit(name);
            applied += 1;
        }
        Ok(())
    }
}

/// Whitespace-only content counts as success without touching the
/// database; the version is still recorded.
fn is_blank(content: &[u8]) -> bool {
    content.iter().all(|b| b.is_ascii_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_blank() {
        assert!(is_blank(b""));
        assert!(is_blank(b" \t\r\n"));
        assert!(!is_blank(b"SELECT 1;"));
        assert!(!is_blank(b"  x  "));
    }

    #[test]
    fn test_progress_line_wording() {
        assert_eq!(
            Migrator::progress_line(Direction::Up, 1),
            "1 migrations applied before failure."
        );
        assert_eq!(
            Migrator::progress_line(Direction::Down, 3),
            "3 migrations rolled back before failure."
        );
    }
}
