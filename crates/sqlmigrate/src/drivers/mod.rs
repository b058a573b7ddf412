//! Built-in database drivers.
//!
//! Each driver module contributes an [`Adapter`](crate::adapter::Adapter)
//! record and, where one is bundled, a connection backend:
//!
//! - [`postgres`]: deadpool-postgres pool, `pg_try_advisory_lock` locking
//! - [`mysql`]: mysql_async pool, `GET_LOCK` named locks
//! - [`sqlite`]: sqlx pool; no server-side lock primitive
//! - [`cql`]: adapter record only; no transactions, no locking
//!
//! To add a database, build an `Adapter` record and hand it to
//! [`register`](crate::adapter::register) at startup.

pub mod cql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::collections::HashMap;

use crate::adapter::Adapter;

/// Adapter records for the drivers compiled into this crate.
pub(crate) fn builtins() -> HashMap<String, Adapter> {
    let mut map = HashMap::new();
    map.insert("postgres".to_string(), postgres::adapter());
    map.insert("mysql".to_string(), mysql::adapter());
    map.insert("sqlite3".to_string(), sqlite::adapter());
    map.insert("cql".to_string(), cql::adapter());
    map
}
