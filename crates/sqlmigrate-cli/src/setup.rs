//! Pre-flight database setup: readiness wait, database and schema creation.
//!
//! These run before the engine proper and use the adapter capability hooks;
//! drivers without a hook fail with a capability error rather than guessing.

use sqlmigrate::{
    adapter_for, ready_wait, sanitize_driver_url, MigrateError, Notifier,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Cli;

pub(crate) async fn prepare(
    cli: &Cli,
    cancel: &CancellationToken,
    notify: &Notifier,
) -> Result<(), MigrateError> {
    let schema = cli.schema.as_deref().filter(|s| !s.is_empty());
    if cli.server_ready == 0 && !cli.create_db && schema.is_none() {
        return Ok(());
    }

    let (driver, url) = sanitize_driver_url(&cli.driver, &cli.url)?;
    let adapter = adapter_for(&driver)?;
    let connect = || {
        adapter.connect.ok_or_else(|| {
            MigrateError::Config(format!(
                "driver {driver:?} has no built-in connection backend"
            ))
        })
    };

    if cli.server_ready > 0 {
        let base = adapter.base_database_url.ok_or(MigrateError::Unsupported {
            driver: driver.clone(),
            operation: "server-ready",
        })?;
        let (admin_url, _) = base(&url)?;

        // The wait has its own deadline, separate from the run's.
        let ready_cancel = cancel.child_token();
        let deadline = ready_cancel.clone();
        let wait_secs = cli.server_ready;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
            deadline.cancel();
        });
        ready_wait(&driver, &[url.clone(), admin_url], notify, &ready_cancel).await?;
    }

    if cli.create_db {
        let base = adapter.base_database_url.ok_or(MigrateError::Unsupported {
            driver: driver.clone(),
            operation: "create-db",
        })?;
        let create = adapter
            .create_database_query
            .ok_or(MigrateError::Unsupported {
                driver: driver.clone(),
                operation: "create-db",
            })?;
        let (admin_url, database_name) = base(&url)?;
        let open = connect()?;
        let pool = open(admin_url).await?;
        if let Err(e) = pool.exec_batch(&create(&database_name)).await {
            // Best effort: the database usually exists already.
            warn!("create database failed (continuing): {e}");
        }
        pool.close().await;
    }

    if let Some(schema) = schema {
        let create = adapter
            .create_schema_query
            .ok_or(MigrateError::Unsupported {
                driver: driver.clone(),
                operation: "schema",
            })?;
        let open = connect()?;
        let pool = open(url.clone()).await?;
        if let Err(e) = pool.exec_batch(&create(schema)).await {
            warn!("create schema failed (continuing): {e}");
        }
        pool.close().await;
    }

    Ok(())
}
