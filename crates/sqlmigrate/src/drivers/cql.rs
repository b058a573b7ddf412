//! CQL (Cassandra) adapter record: no transactions, no server-side lock
//! primitive, keyspace-based URL surgery.
//!
//! This is a record-only driver; no session binding is bundled. Callers
//! pair it with their own pool through
//! [`Migrator::with_pool`](crate::runner::Migrator::with_pool), or replace
//! the record wholesale via [`register`](crate::adapter::register) with a
//! `connect` backend of their own.

use url::Url;

use crate::adapter::{Adapter, TxnSupport, VERSIONS_TABLE};
use crate::error::{MigrateError, Result};

pub(crate) fn adapter() -> Adapter {
    Adapter {
        create_versions_table,
        select_existing_versions,
        insert_new_version,
        delete_old_version,
        ping_query: "SELECT gossip_generation FROM system.local",
        create_database_query: None,
        create_schema_query: None,
        base_database_url: Some(base_database_url),
        txn_support: TxnSupport::PassThrough,
        harmless_commit_error: None,
        supports_locking: false,
        acquire_lock: None,
        release_lock: None,
        connect: None,
    }
}

fn create_versions_table(_schema: Option<&str>) -> String {
    format!("CREATE TABLE IF NOT EXISTS {VERSIONS_TABLE} (version text, PRIMARY KEY (version))")
}

fn select_existing_versions(_schema: Option<&str>) -> String {
    // CQL cannot ORDER BY a partition key; the engine sorts in memory.
    format!("SELECT version FROM {VERSIONS_TABLE}")
}

fn insert_new_version(_schema: Option<&str>) -> String {
    format!("INSERT INTO {VERSIONS_TABLE} (version) VALUES (?)")
}

fn delete_old_version(_schema: Option<&str>) -> String {
    format!("DELETE FROM {VERSIONS_TABLE} WHERE version = ?")
}

/// The target keyspace rides in the `keyspace` query parameter; the admin
/// connection points at the always-present `system` keyspace.
fn base_database_url(database_url: &str) -> Result<(String, String)> {
    let mut url = Url::parse(database_url)
        .map_err(|e| MigrateError::Config(format!("invalid cassandra dsn: {e}")))?;
    let keyspace = url
        .query_pairs()
        .find(|(key, _)| key == "keyspace")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "keyspace")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &others {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("keyspace", "system");
    }
    Ok((url.into(), keyspace))
}
