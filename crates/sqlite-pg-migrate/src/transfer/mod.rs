//! Data transfer engine.
//!
//! Rows stream from the source reader task in batches. Each batch is inserted
//! as one transaction; when a batch is rolled back, its rows are retried one
//! by one with empty strings turned into NULLs, and rows that still fail are
//! recorded and dropped. Tables and batches are processed sequentially, so
//! every failure maps to a specific source row range.

use std::collections::HashSet;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::core::context::MigrationContext;
use crate::core::ddl::{target_columns, TargetColumn};
use crate::core::schema::{SchemaModel, TableSchema};
use crate::core::traits::ReadOptions;
use crate::core::value::{coerce_empty_to_null, Batch, Row};
use crate::error::{MigrateError, Result};
use crate::orchestrator::report::{Outcome, RowFailure, TableTransferReport};

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Number of rows per batch.
    pub batch_size: usize,
    /// Row failures kept per table in the report.
    pub max_row_errors_reported: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_row_errors_reported: 100,
        }
    }
}

/// Transfer engine for moving rows from the source to the target.
pub struct TransferEngine<'a> {
    ctx: &'a MigrationContext,
    config: TransferConfig,
}

impl<'a> TransferEngine<'a> {
    /// Create a new transfer engine.
    pub fn new(ctx: &'a MigrationContext, config: TransferConfig) -> Self {
        Self { ctx, config }
    }

    /// Transfer every table in `tables`, referenced tables first.
    ///
    /// Tables left after cancellation are reported as skipped.
    pub async fn run(
        &self,
        model: &SchemaModel,
        tables: &[&TableSchema],
    ) -> IndexMap<String, TableTransferReport> {
        let mut reports = IndexMap::new();

        for table in transfer_order(model, tables) {
            let report = if self.ctx.is_cancelled() {
                TableTransferReport::skipped("cancelled")
            } else {
                self.transfer_table(table).await
            };
            reports.insert(table.name.clone(), report);
        }

        reports
    }

    /// Copy one table.
    pub async fn transfer_table(&self, table: &TableSchema) -> TableTransferReport {
        let start = Instant::now();
        let columns = target_columns(table);
        let mut report = TableTransferReport::new();

        let mut rx = self.ctx.source.read_table(ReadOptions {
            table: table.name.clone(),
            columns: table.column_names(),
            batch_size: self.config.batch_size,
        });

        loop {
            if self.ctx.is_cancelled() {
                info!(
                    "{}: cancelled after {} rows",
                    table.name, report.rows_transferred
                );
                report.outcome = Outcome::skipped(format!(
                    "cancelled after {} rows",
                    report.rows_transferred
                ));
                return report;
            }

            let next = self
                .ctx
                .guard(format!("read {}", table.name), async {
                    Ok(rx.recv().await)
                })
                .await;

            let batch = match next {
                Ok(Some(Ok(batch))) => batch,
                Ok(None) => break,
                Ok(Some(Err(e))) | Err(e) => {
                    warn!("{}: reading source failed: {}", table.name, e);
                    report.outcome = Outcome::failed(e);
                    return report;
                }
            };

            self.write_batch(table, &columns, batch, &mut report).await;
        }

        if report.rows_read == 0 {
            info!("No data in table {}", table.name);
            report.outcome = Outcome::skipped("no rows");
            return report;
        }

        info!(
            "{}: {} rows transferred, {} failed in {:.1}s",
            table.target_name,
            report.rows_transferred,
            report.rows_failed,
            start.elapsed().as_secs_f64()
        );
        report
    }

    async fn write_batch(
        &self,
        table: &TableSchema,
        columns: &[TargetColumn],
        batch: Batch,
        report: &mut TableTransferReport,
    ) {
        report.rows_read += batch.len() as u64;
        report.batches += 1;

        match self.insert(table, columns, &batch.rows).await {
            Ok(n) => {
                report.rows_transferred += n;
                debug!(
                    "Imported {} rows into {} (total: {})",
                    n, table.target_name, report.rows_transferred
                );
                return;
            }
            Err(e) => {
                let err = MigrateError::BatchTransfer {
                    table: table.target_name.clone(),
                    first_row: batch.first_row,
                    last_row: batch.last_row(),
                    message: e.to_string(),
                };
                warn!("{}; retrying rows individually", err);
            }
        }

        report.fallback_batches += 1;
        for (offset, row) in batch.rows.iter().enumerate() {
            let row_number = batch.first_row + offset as u64;
            let coerced = coerce_empty_to_null(row);
            match self
                .insert(table, columns, std::slice::from_ref(&coerced))
                .await
            {
                Ok(n) => report.rows_transferred += n,
                Err(e) => {
                    let err = MigrateError::RowTransfer {
                        table: table.target_name.clone(),
                        row: row_number,
                        message: e.to_string(),
                    };
                    warn!("{}", err);
                    report.rows_failed += 1;
                    if report.row_failures.len() < self.config.max_row_errors_reported {
                        report.row_failures.push(RowFailure {
                            row: row_number,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn insert(
        &self,
        table: &TableSchema,
        columns: &[TargetColumn],
        rows: &[Row],
    ) -> Result<u64> {
        self.ctx
            .guard(
                format!("insert into {}", table.target_name),
                self.ctx
                    .target
                    .insert_batch(&table.target_name, columns, rows),
            )
            .await
    }
}

/// Order tables so that referenced tables load before the tables that
/// reference them. Cycles and self references keep model order.
pub fn transfer_order<'t>(model: &SchemaModel, tables: &[&'t TableSchema]) -> Vec<&'t TableSchema> {
    let names: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let deps: Vec<HashSet<&str>> = tables
        .iter()
        .map(|t| {
            model
                .foreign_keys_of(&t.name)
                .iter()
                .map(|fk| fk.ref_table.as_str())
                .filter(|r| *r != t.name && names.contains(r))
                .collect()
        })
        .collect();

    let mut done: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(tables.len());
    let mut pending: Vec<usize> = (0..tables.len()).collect();

    while !pending.is_empty() {
        let pick = pending
            .iter()
            .position(|&i| deps[i].iter().all(|d| done.contains(d)))
            .unwrap_or(0);
        let i = pending.remove(pick);
        done.insert(tables[i].name.as_str());
        order.push(tables[i]);
    }

    order
}
