//! Core abstractions for the migration engine.
//!
//! - [`schema`]: normalized schema model (tables, columns, keys)
//! - [`value`]: SQL values as read from the source
//! - [`identifier`]: sanitizing and quoting identifiers
//! - [`ddl`]: engine-neutral DDL statements
//! - [`traits`]: the source catalog and target executor seams
//! - [`context`]: the run-scoped context passed to every component

pub mod context;
pub mod ddl;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use context::MigrationContext;
pub use ddl::{target_columns, ColumnDef, DdlStatement, TargetColumn};
pub use identifier::{quote_ident, sanitize};
pub use schema::{
    ColumnSpec, DuplicateGroup, DuplicateReport, ForeignKeyRef, IdentifierCollision,
    OnDeleteAction, SchemaModel, TableSchema,
};
pub use traits::{RawColumn, RawForeignKey, ReadOptions, SourceCatalog, TargetExecutor};
pub use value::{coerce_empty_to_null, Batch, Row, SqlValue};
