//! Error types for the migration library.
//!
//! Only [`MigrateError::Introspection`] (and run-level failures such as an
//! overall timeout) abort a run. The table- and row-local kinds are produced
//! by the components and folded into the run report instead of propagating.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Source schema could not be read; the run cannot continue.
    #[error("Schema introspection failed: {0}")]
    Introspection(String),

    /// A table, key or index could not be applied to the target.
    #[error("Constraint application failed for table {table}: {message}")]
    ConstraintApplication { table: String, message: String },

    /// A batch insert was rolled back.
    #[error("Batch transfer failed for table {table} (rows {first_row}..={last_row}): {message}")]
    BatchTransfer {
        table: String,
        first_row: u64,
        last_row: u64,
        message: String,
    },

    /// A single row could not be inserted even on its own.
    #[error("Row {row} of table {table} failed: {message}")]
    RowTransfer {
        table: String,
        row: u64,
        message: String,
    },

    /// Duplicate-key audit query failed for one table.
    #[error("Duplicate audit failed for table {table}: {message}")]
    AuditQuery { table: String, message: String },

    /// An external call or the whole run exceeded its deadline.
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

/// Exit codes used by the CLI.
pub const EXIT_CONFIG_ERROR: u8 = 1;
pub const EXIT_SOURCE_ERROR: u8 = 2;
pub const EXIT_TARGET_ERROR: u8 = 3;
pub const EXIT_INTROSPECTION_ERROR: u8 = 4;
pub const EXIT_TIMEOUT: u8 = 5;
pub const EXIT_CANCELLED: u8 = 6;
pub const EXIT_IO_ERROR: u8 = 7;
pub const EXIT_OTHER: u8 = 8;

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a ConstraintApplication error
    pub fn constraint(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::ConstraintApplication {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create an AuditQuery error
    pub fn audit(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::AuditQuery {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Source(_) => EXIT_SOURCE_ERROR,
            MigrateError::Target(_) | MigrateError::Pool { .. } => EXIT_TARGET_ERROR,
            MigrateError::Introspection(_) => EXIT_INTROSPECTION_ERROR,
            MigrateError::Timeout { .. } => EXIT_TIMEOUT,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            _ => EXIT_OTHER,
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
