//! Server-readiness polling against the adapter's liveness probe.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::{adapter_for, Notifier};
use crate::error::{MigrateError, Result};

const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait until one of `database_urls` accepts a connection and answers the
/// driver's ping query. Candidates are tried round-robin, one second apart,
/// until success or cancellation. Callers typically pass the target URL
/// followed by the adapter's admin URL so a not-yet-created database does
/// not block readiness.
pub async fn ready_wait(
    driver_name: &str,
    database_urls: &[String],
    notify: &Notifier,
    cancel: &CancellationToken,
) -> Result<()> {
    let adapter = adapter_for(driver_name)?;
    if adapter.ping_query.is_empty() {
        return Err(MigrateError::Unsupported {
            driver: driver_name.to_string(),
            operation: "server-ready",
        });
    }
    let connect = adapter.connect.ok_or_else(|| {
        MigrateError::Config(format!(
            "driver {driver_name:?} has no built-in connection backend"
        ))
    })?;
    if database_urls.is_empty() {
        return Err(MigrateError::MissingUrl);
    }

    notify.emit(&format!("{driver_name}: checking connection"));
    let mut curr = 0usize;
    loop {
        let url = &database_urls[curr];
        curr = (curr + 1) % database_urls.len();

        match connect(url.clone()).await {
            Ok(pool) => {
                notify.emit(&format!("{driver_name}: server up"));
                let ping = pool.ping(adapter.ping_query).await;
                pool.close().await;
                match ping {
                    Ok(()) => {
                        notify.emit(&format!("{driver_name}: connected"));
                        return Ok(());
                    }
                    Err(e) => debug!("ping failed on candidate url: {e}"),
                }
            }
            Err(e) => debug!("connect failed on candidate url: {e}"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
            _ = tokio::time::sleep(READY_POLL_INTERVAL) => {
                notify.emit(&format!("{driver_name}: retrying..."));
            }
        }
    }
}
