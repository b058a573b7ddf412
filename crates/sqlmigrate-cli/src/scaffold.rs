//! New-migration scaffolding: versioned, sanitised filename pairs.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sqlmigrate::Result;
use tracing::info;

fn sanitizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\W+").expect("static pattern"))
}

/// `<UTC timestamp>_<sanitised description>`: lowercase, non-word runs
/// collapsed to `-`, leading/trailing `-` trimmed.
pub(crate) fn versioned_name(now: DateTime<Utc>, description: &str) -> String {
    let slug = sanitizer().replace_all(&description.to_lowercase(), "-");
    let slug = slug.trim_matches('-');
    format!("{}_{}", now.format("%Y%m%d%H%M%S"), slug)
}

/// Write the empty `.up.sql`/`.down.sql` pair, creating the directory if
/// needed. `no_db_txn` inserts the per-file transaction opt-out marker.
pub(crate) fn write_pair(dir: &Path, name: &str, no_db_txn: bool) -> Result<()> {
    fs::create_dir_all(dir)?;
    let marker = if no_db_txn { ".no-db-txn" } else { "" };
    for suffix in [".up.sql", ".down.sql"] {
        let path = dir.join(format!("{name}{marker}{suffix}"));
        info!("writing {}", path.display());
        fs::write(&path, b"")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 13, 4, 5).unwrap()
    }

    #[test]
    fn test_versioned_name() {
        assert_eq!(
            versioned_name(fixed_now(), "Add Users Table"),
            "20240102130405_add-users-table"
        );
        assert_eq!(
            versioned_name(fixed_now(), "  weird!! chars?? "),
            "20240102130405_weird-chars"
        );
        assert_eq!(versioned_name(fixed_now(), ""), "20240102130405_");
    }

    #[test]
    fn test_write_pair() {
        let dir = TempDir::new().unwrap();
        write_pair(dir.path(), "20240102130405_add-users", false).unwrap();
        assert!(dir.path().join("20240102130405_add-users.up.sql").exists());
        assert!(dir.path().join("20240102130405_add-users.down.sql").exists());
    }

    #[test]
    fn test_write_pair_no_db_txn_marker() {
        let dir = TempDir::new().unwrap();
        write_pair(dir.path(), "20240102130405_add-index", true).unwrap();
        assert!(dir
            .path()
            .join("20240102130405_add-index.no-db-txn.up.sql")
            .exists());
        assert!(dir
            .path()
            .join("20240102130405_add-index.no-db-txn.down.sql")
            .exists());
    }
}
