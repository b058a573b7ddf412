//! Transaction modes and the per-file no-transaction override.

use std::fmt;
use std::str::FromStr;

use crate::error::{MigrateError, Result};

/// How migration files are wrapped in database transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxnMode {
    /// All selected files in a single transaction.
    #[default]
    All,
    /// Each file in its own transaction; `.no-db-txn.` files run bare.
    PerFile,
    /// No transaction wrapping at any level.
    None,
}

impl TxnMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TxnMode::All => "all",
            TxnMode::PerFile => "per-file",
            TxnMode::None => "none",
        }
    }
}

impl fmt::Display for TxnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxnMode {
    type Err = MigrateError;

    /// Accepts exactly the lowercase literals `all`, `per-file`, `none`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(TxnMode::All),
            "per-file" => Ok(TxnMode::PerFile),
            "none" => Ok(TxnMode::None),
            other => Err(MigrateError::InvalidTxnMode(other.to_string())),
        }
    }
}

/// Marker that opts a single file out of transaction wrapping
/// (`CREATE INDEX CONCURRENTLY` and friends). Exact case, literal dots.
pub const NO_TXN_MARKER: &str = ".no-db-txn.";

/// True when `filename` carries the `.no-db-txn.` marker.
pub fn requires_no_txn(filename: &str) -> bool {
    filename.contains(NO_TXN_MARKER)
}

/// Rejects mode `all` when any selected file opts out of transactions.
/// Vacuous in `per-file` and `none` modes.
pub(crate) fn validate_txn_mode(files: &[String], mode: TxnMode) -> Result<()> {
    if mode != TxnMode::All {
        return Ok(());
    }
    let conflicts: Vec<String> = files
        .iter()
        .filter(|f| requires_no_txn(f))
        .cloned()
        .collect();
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(MigrateError::TxnModeConflict {
            files: conflicts,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_modes() {
        assert_eq!("all".parse::<TxnMode>().unwrap(), TxnMode::All);
        assert_eq!("per-file".parse::<TxnMode>().unwrap(), TxnMode::PerFile);
        assert_eq!("none".parse::<TxnMode>().unwrap(), TxnMode::None);
    }

    #[test]
    fn test_parse_rejects_everything_else() {
        // Partial matches and case variants must fail; exact literals only.
        for input in [
            "invalid", "", "al", "ll", "per-fil", "er-file", "non", "All", "ALL", "Per-File",
            "PER-FILE", "None", "NONE",
        ] {
            let err = input.parse::<TxnMode>().unwrap_err();
            assert!(
                err.to_string().contains("must be one of: all, per-file, none"),
                "input: {input:?}"
            );
        }
    }

    #[test]
    fn test_requires_no_txn() {
        let cases = [
            ("20240101120000_create_users.up.sql", false),
            ("20240101120000_create_users.down.sql", false),
            ("20240101130000_add_index.no-db-txn.up.sql", true),
            ("20240101130000_add_index.no-db-txn.down.sql", true),
            ("some/path/20240101130000_add_index.no-db-txn.up.sql", true),
            // Partial matches must not trigger (exact ".no-db-txn." required).
            ("20240101130000_add_index.no-db-txnup.sql", false),
            ("20240101130000_add_indexno-db-txn.up.sql", false),
            ("20240101130000_add_index.no-db-tx.up.sql", false),
            ("20240101130000_add_index.o-db-txn.up.sql", false),
            // Case mismatches must not trigger.
            ("20240101130000_add_index.No-Db-Txn.up.sql", false),
            ("20240101130000_add_index.NO-DB-TXN.up.sql", false),
        ];
        for (filename, expected) in cases {
            assert_eq!(requires_no_txn(filename), expected, "filename: {filename}");
        }
    }

    #[test]
    fn test_validate_txn_mode() {
        let plain = vec![
            "20240101_create.up.sql".to_string(),
            "20240102_add.up.sql".to_string(),
        ];
        let mixed = vec![
            "20240101_create.up.sql".to_string(),
            "20240102_add.no-db-txn.up.sql".to_string(),
        ];

        assert!(validate_txn_mode(&plain, TxnMode::All).is_ok());
        assert!(validate_txn_mode(&mixed, TxnMode::PerFile).is_ok());
        assert!(validate_txn_mode(&mixed, TxnMode::None).is_ok());

        let err = validate_txn_mode(&mixed, TxnMode::All).unwrap_err();
        match err {
            MigrateError::TxnModeConflict { files, mode } => {
                assert_eq!(files, vec!["20240102_add.no-db-txn.up.sql".to_string()]);
                assert_eq!(mode, TxnMode::All);
            }
            other => panic!("expected TxnModeConflict, got {other:?}"),
        }
    }
}
