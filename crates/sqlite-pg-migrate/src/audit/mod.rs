//! Duplicate primary-key audit.
//!
//! SQLite can hold rows that violate a declared key (legacy files, keys
//! declared on tables imported without constraint checks). The audit groups
//! each keyed table by its primary key and reports every group seen more
//! than once. It is advisory: the run continues either way, and the same
//! duplicates later surface as a primary-key failure on the target.

use tracing::{info, warn};

use crate::core::context::MigrationContext;
use crate::core::identifier::{quote_ident, quote_list};
use crate::core::schema::{DuplicateGroup, DuplicateReport, SchemaModel, TableSchema};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

/// Outcome of auditing every keyed table.
#[derive(Debug, Default)]
pub struct AuditResult {
    /// Tables with duplicate keys, in model order.
    pub duplicates: DuplicateReport,

    /// Tables whose audit query failed.
    pub failures: Vec<MigrateError>,
}

/// Check every table with a primary key for duplicate key values.
pub async fn audit(ctx: &MigrationContext, model: &SchemaModel) -> AuditResult {
    let mut result = AuditResult::default();

    for table in model.tables.values().filter(|t| t.has_pk()) {
        match audit_table(ctx, table).await {
            Ok(groups) if groups.is_empty() => {}
            Ok(groups) => {
                warn!(
                    "{}: {} duplicate primary key groups",
                    table.name,
                    groups.len()
                );
                result.duplicates.insert(table.name.clone(), groups);
            }
            Err(e) => {
                warn!("Duplicate check skipped for {}: {}", table.name, e);
                let failure = match e {
                    MigrateError::AuditQuery { .. } => e,
                    other => MigrateError::audit(&table.name, other),
                };
                result.failures.push(failure);
            }
        }
    }

    info!(
        "Audit complete: {} tables with duplicate keys, {} checks failed",
        result.duplicates.len(),
        result.failures.len()
    );
    result
}

/// Grouping query over the primary key.
pub fn duplicate_query(table: &TableSchema) -> Result<String> {
    let pk = quote_list(&table.primary_key)?;
    Ok(format!(
        "SELECT {pk}, COUNT(*) AS cnt FROM {} GROUP BY {pk} HAVING COUNT(*) > 1",
        quote_ident(&table.name)?
    ))
}

async fn audit_table(ctx: &MigrationContext, table: &TableSchema) -> Result<Vec<DuplicateGroup>> {
    let sql = duplicate_query(table)?;
    let rows = ctx
        .guard(
            format!("duplicate audit of {}", table.name),
            ctx.source.query(&sql),
        )
        .await?;

    rows.into_iter()
        .map(|mut row| {
            let count = match row.pop() {
                Some(SqlValue::I64(n)) => n,
                other => {
                    return Err(MigrateError::audit(
                        &table.name,
                        format!("unexpected count value {:?}", other),
                    ))
                }
            };
            Ok(DuplicateGroup { key: row, count })
        })
        .collect()
}
