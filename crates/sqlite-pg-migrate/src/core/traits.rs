//! Collaborator traits the migration engine is written against.
//!
//! - [`SourceCatalog`]: schema metadata and row data of the store migrated from
//! - [`TargetExecutor`]: DDL and transactional inserts on the store migrated to
//!
//! The concrete implementations are [`crate::source::SqliteCatalog`] and
//! [`crate::target::PgExecutor`]; tests use an in-memory target.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

use super::ddl::{DdlStatement, TargetColumn};
use super::value::{Batch, Row};

/// Column metadata as reported by the source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    /// Ordinal position (0-based).
    pub ordinal: i32,
    pub name: String,
    /// Declared type, possibly empty.
    pub data_type: String,
    pub not_null: bool,
    /// Default expression text.
    pub default: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk_position: i32,
}

/// One foreign-key catalog row. Composite keys span several rows sharing `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawForeignKey {
    pub id: i64,
    pub seq: i64,
    /// Referenced table.
    pub ref_table: String,
    /// Local column.
    pub from: String,
    /// Referenced column; `None` when the reference names no column list.
    pub to: Option<String>,
    pub on_delete: Option<String>,
}

/// Options for reading rows from a table.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Source table name.
    pub table: String,
    /// Columns to read, in order.
    pub columns: Vec<String>,
    /// Number of rows per batch.
    pub batch_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            table: String::new(),
            columns: Vec::new(),
            batch_size: 1000,
        }
    }
}

/// Read schema and data from the source database.
///
/// # Streaming
///
/// [`read_table`](SourceCatalog::read_table) returns a channel receiver fed
/// by a background task, so a large table is never held in memory at once.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Names of all user tables, in catalog order.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Column metadata for a table, in ordinal order.
    async fn load_columns(&self, table: &str) -> Result<Vec<RawColumn>>;

    /// Foreign-key rows for a table, ordered by id then seq.
    async fn load_foreign_keys(&self, table: &str) -> Result<Vec<RawForeignKey>>;

    /// Run a read-only query and return every row.
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Start streaming rows from a table.
    ///
    /// Yields batches in source read order until the table is exhausted.
    /// An error item ends the stream.
    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>>;

    /// Get the row count for a table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Round-trip a trivial query.
    async fn ping(&self) -> Result<()>;

    /// Get the database type identifier (e.g., "sqlite").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// Apply schema and write data to the target database.
#[async_trait]
pub trait TargetExecutor: Send + Sync {
    // ===== Schema Operations =====

    /// Create the target schema if it does not exist.
    async fn ensure_schema(&self) -> Result<()>;

    /// Execute one DDL statement.
    async fn apply(&self, stmt: &DdlStatement) -> Result<()>;

    /// SQL text `apply` would execute, for dry runs.
    fn render(&self, stmt: &DdlStatement) -> Result<String>;

    /// Check if a table already has a primary key.
    async fn has_primary_key(&self, table: &str) -> Result<bool>;

    /// Check if a named constraint exists on a table.
    async fn constraint_exists(&self, table: &str, name: &str) -> Result<bool>;

    // ===== Data Operations =====

    /// Insert rows in one transaction.
    ///
    /// Either every row is committed or none is; any row error rolls the
    /// whole call back. Returns the number of rows inserted.
    async fn insert_batch(&self, table: &str, columns: &[TargetColumn], rows: &[Row])
        -> Result<u64>;

    // ===== Utility Operations =====

    /// Check if a table exists in the target schema.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Get the row count for a table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Round-trip a trivial query.
    async fn ping(&self) -> Result<()>;

    /// Get the database type identifier (e.g., "postgres").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}
