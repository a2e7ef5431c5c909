//! Error types for the migration library.

use thiserror::Error;

/// Process exit code for a successful run.
pub const EXIT_SUCCESS: u8 = 0;
/// Invalid configuration, scope or credentials.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// The run finished but left more failed assets than tolerated.
pub const EXIT_FAILURES_ABOVE_TOLERANCE: u8 = 2;
/// The ledger could not be read or written.
pub const EXIT_LEDGER_ERROR: u8 = 3;
/// Listing the source store failed.
pub const EXIT_ENUMERATION_ERROR: u8 = 4;
/// Any other file operation failed.
pub const EXIT_IO_ERROR: u8 = 7;
/// Interrupted before any work was done.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for migration operations.
///
/// Only run-level failures are represented here. A single asset failing to
/// transfer is a [`crate::transfer::TransferError`] and is recorded in the
/// ledger instead of aborting the run.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad scope, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger could not be opened, read or appended to
    #[error("Ledger error at {path}: {message}")]
    Ledger { path: String, message: String },

    /// Listing the source store failed before any asset was found
    #[error("Enumeration failed for prefix '{prefix}': {message}")]
    Enumeration { prefix: String, message: String },

    /// Inventory cache could not be read or written
    #[error("Inventory cache error: {0}")]
    Cache(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Worker task panicked or was lost
    #[error("Worker error: {0}")]
    Worker(String),

    /// Migration was cancelled (SIGINT, etc.) before any work started
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Ledger error for the given file.
    pub fn ledger(path: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Ledger {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an Enumeration error for a listing prefix.
    pub fn enumeration(prefix: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Enumeration {
            prefix: prefix.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Ledger { .. } => EXIT_LEDGER_ERROR,
            MigrateError::Enumeration { .. } => EXIT_ENUMERATION_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Cache(_)
            | MigrateError::Io(_)
            | MigrateError::Json(_)
            | MigrateError::Worker(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            MigrateError::ledger("log.csv", "disk full").exit_code(),
            EXIT_LEDGER_ERROR
        );
        assert_eq!(
            MigrateError::enumeration("manga", "403").exit_code(),
            EXIT_ENUMERATION_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::from(io).exit_code(), EXIT_IO_ERROR);
        assert_eq!(MigrateError::Cancelled.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = MigrateError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: denied"));
    }

    #[test]
    fn test_ledger_error_message() {
        let err = MigrateError::ledger("migration_log.csv", "write failed");
        assert_eq!(
            err.to_string(),
            "Ledger error at migration_log.csv: write failed"
        );
    }
}
