//! Error types for the migration engine.

use thiserror::Error;

use crate::mode::TxnMode;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// No database URL was supplied.
    #[error("database url not set")]
    MissingUrl,

    /// The URL carries no scheme the driver could be inferred from.
    #[error("cannot discern db driver from the url; pass the driver name explicitly")]
    DriverRequired,

    /// No adapter is registered under this driver name.
    #[error("unsupported driver name {0:?}")]
    UnknownDriver(String),

    /// Transaction mode string was not one of the exact literals.
    #[error("invalid transaction mode {0:?}: must be one of: all, per-file, none")]
    InvalidTxnMode(String),

    /// Files marked `.no-db-txn.` were selected while mode is `all`.
    #[error("{}", txn_conflict_message(.files, .mode))]
    TxnModeConflict { files: Vec<String>, mode: TxnMode },

    /// Locking was required but the driver has no server-side lock primitive.
    #[error("{}", locking_not_supported_message(.driver))]
    LockingNotSupported { driver: String },

    /// The driver lacks an optional capability (create-db, server-ready, schema).
    #[error("{driver:?} does not support {operation}")]
    Unsupported {
        driver: String,
        operation: &'static str,
    },

    /// Failed to acquire the migration lock.
    #[error("unable to acquire migration lock: {0}")]
    Lock(String),

    /// Raw database error with context about where it occurred.
    #[error("database error: {message}\n  context: {context}")]
    Db { message: String, context: String },

    /// The bookkeeping table could not be read.
    #[error("unable to query existing versions: {}", versions_query_message(.message, .create_context))]
    VersionsQuery {
        message: String,
        create_context: Option<String>,
    },

    /// A version token could not be inserted or deleted.
    #[error("fail to {action} version {version:?}: {message}")]
    Bookkeeping {
        action: &'static str,
        version: String,
        message: String,
    },

    /// A migration file failed, annotated with the filename and, in
    /// per-file/none modes, how many files completed before it.
    #[error("{}", migration_failure_message(.file, .message, .progress))]
    Migration {
        file: String,
        message: String,
        progress: Option<String>,
    },

    /// Two files resolve to the same version and direction.
    #[error("duplicate migration version {version:?}: {first} and {second}")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    /// A `.sql` file without a `.up.sql` or `.down.sql` suffix.
    #[error("unrecognised migration filename {0:?}: expected a `.up.sql` or `.down.sql` suffix")]
    BadFilename(String),

    /// Anything wrong with how the engine was invoked.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was cancelled by signal or deadline.
    #[error("operation cancelled")]
    Cancelled,

    /// IO error (reading migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Create a database error with context about where it occurred.
    pub fn db(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Db {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Format the error with its full source chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\n\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }
        output
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::MissingUrl
            | MigrateError::DriverRequired
            | MigrateError::UnknownDriver(_)
            | MigrateError::InvalidTxnMode(_)
            | MigrateError::Config(_) => 2,
            MigrateError::TxnModeConflict { .. }
            | MigrateError::LockingNotSupported { .. }
            | MigrateError::Unsupported { .. } => 3,
            _ => 1,
        }
    }
}

fn txn_conflict_message(files: &[String], mode: &TxnMode) -> String {
    let mut msg = format!("cannot apply migrations in --db-txn-mode={mode}\n\n");
    msg.push_str("The following migrations require --db-txn-mode=per-file:\n");
    for file in files {
        msg.push_str("  - ");
        msg.push_str(file);
        msg.push('\n');
    }
    msg.push_str("\nRun with: sqlmigrate up --db-txn-mode=per-file");
    msg
}

fn locking_not_supported_message(driver: &str) -> String {
    format!(
        "{driver} does not support cross-process locking.\n\n\
         If you are certain only one migration process runs at a time, use:\n\n  \
         sqlmigrate up --no-lock\n\n\
         This is safe for single-process deployments (e.g., local development,\n\
         single-node production with migrations run before the app starts)."
    )
}

fn versions_query_message(message: &str, create_context: &Option<String>) -> String {
    match create_context {
        Some(create) => format!("{message} (create table attempt: {create})"),
        None => message.to_string(),
    }
}

fn migration_failure_message(file: &str, message: &str, progress: &Option<String>) -> String {
    match progress {
        Some(line) => format!("{file}: {message}\n{line}"),
        None => format!("{file}: {message}"),
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_mode_conflict_message() {
        let err = MigrateError::TxnModeConflict {
            files: vec!["20240101130000_add_index.no-db-txn.up.sql".to_string()],
            mode: TxnMode::All,
        };
        let msg = err.to_string();
        assert!(msg.contains("--db-txn-mode=all"));
        assert!(msg.contains("20240101130000_add_index.no-db-txn.up.sql"));
        assert!(msg.contains("--db-txn-mode=per-file"));
    }

    #[test]
    fn test_locking_not_supported_message() {
        let err = MigrateError::LockingNotSupported {
            driver: "sqlite3".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sqlite3 does not support cross-process locking"));
        assert!(msg.contains("--no-lock"));
    }

    #[test]
    fn test_migration_failure_message_with_progress() {
        let err = MigrateError::Migration {
            file: "20240102_bad.up.sql".to_string(),
            message: "syntax error".to_string(),
            progress: Some("1 migrations applied before failure.".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("20240102_bad.up.sql"));
        assert!(msg.contains("1 migrations applied before failure."));
    }

    #[test]
    fn test_bookkeeping_message() {
        let err = MigrateError::Bookkeeping {
            action: "register",
            version: "20240101".to_string(),
            message: "duplicate key".to_string(),
        };
        assert!(err.to_string().contains("fail to register version \"20240101\""));
    }

    #[test]
    fn test_versions_query_includes_create_context() {
        let err = MigrateError::VersionsQuery {
            message: "relation does not exist".to_string(),
            create_context: Some("permission denied".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("unable to query existing versions"));
        assert!(msg.contains("relation does not exist"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::MissingUrl.exit_code(), 2);
        assert_eq!(
            MigrateError::LockingNotSupported {
                driver: "cql".to_string()
            }
            .exit_code(),
            3
        );
        assert_eq!(MigrateError::Cancelled.exit_code(), 1);
    }
}
