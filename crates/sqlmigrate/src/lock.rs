//! Advisory-lock identity and polling cadence.

use std::time::Duration;

/// How often a blocked acquisition re-probes the database.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Derive the advisory-lock key for a database/schema/table triple.
///
/// The parts are joined with a NUL separator and hashed with CRC32 (IEEE);
/// the decimal rendering of the 32-bit sum is the key. Pure and stable
/// across processes; acquire and release must use the same derivation.
/// Postgres receives it parsed as a bigint, MySQL as the string itself.
pub fn lock_id(database_name: &str, schema: Option<&str>, table: &str) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(database_name.as_bytes());
    if let Some(schema) = schema.filter(|s| !s.is_empty()) {
        hasher.update(b"\x00");
        hasher.update(schema.as_bytes());
    }
    hasher.update(b"\x00");
    hasher.update(table.as_bytes());
    hasher.finalize().to_string()
}
