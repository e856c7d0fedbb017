//! # sqlite-pg-migrate
//!
//! SQLite to PostgreSQL schema and data migration library.
//!
//! A run reads the SQLite catalog, audits primary keys for duplicates,
//! recreates tables, keys and foreign keys on PostgreSQL and copies the rows
//! in batches:
//!
//! - **Type mapping** from SQLite declared types to PostgreSQL types
//! - **Primary key fallback** to a unique index when the key cannot be added
//! - **Batch transfer** with per-row retry of rolled back batches
//! - **Run report** recording every table, key and row outcome
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_pg_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> sqlite_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(CancellationToken::new(), false).await?;
//!     println!("Migrated {} rows", report.totals.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod introspect;
pub mod orchestrator;
pub mod source;
pub mod synthesis;
pub mod target;
pub mod transfer;
pub mod typemap;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use crate::core::context::MigrationContext;
pub use crate::core::schema::{ColumnSpec, ForeignKeyRef, OnDeleteAction, SchemaModel, TableSchema};
pub use crate::core::traits::{SourceCatalog, TargetExecutor};
pub use crate::core::value::SqlValue;
pub use error::{MigrateError, Result};
pub use orchestrator::{
    HealthCheckResult, MigrationReport, Orchestrator, Outcome, RowCountCheck, RunStatus,
};
pub use source::SqliteCatalog;
pub use target::{PgExecutor, SslMode};
pub use transfer::{TransferConfig, TransferEngine};
