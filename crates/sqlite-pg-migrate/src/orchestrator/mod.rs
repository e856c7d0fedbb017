//! Migration orchestrator - main workflow coordinator.
//!
//! A run is introspect, audit, synthesize, transfer. Only introspection
//! failure (or the overall deadline) aborts it; everything else is recorded
//! in the [`MigrationReport`].

pub mod report;

use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::audit;
use crate::config::Config;
use crate::core::context::MigrationContext;
use crate::core::schema::TableSchema;
use crate::core::traits::{SourceCatalog, TargetExecutor};
use crate::error::{MigrateError, Result};
use crate::introspect::introspect;
use crate::source::SqliteCatalog;
use crate::synthesis::{collision_exclusions, synthesize};
use crate::target::PgExecutor;
use crate::transfer::{TransferConfig, TransferEngine};

pub use report::{
    AuditFailure, ForeignKeyOutcome, MigrationReport, Outcome, RowFailure, RunStatus,
    TableDdlReport, TableReport, TableTransferReport, Totals,
};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    ctx: MigrationContext,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Row counts of one table on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowCountCheck {
    pub target_name: String,
    pub source_rows: i64,
    pub target_rows: i64,
    pub matches: bool,
}

impl Orchestrator {
    /// Connect to the configured source and target.
    pub async fn new(config: Config) -> Result<Self> {
        let source = SqliteCatalog::new(&config.source).await?;
        let target = PgExecutor::new(&config.target, config.migration.max_pg_connections).await?;
        Ok(Self::from_parts(config, Arc::new(source), Arc::new(target)))
    }

    /// Build an orchestrator around existing collaborators.
    pub fn from_parts(
        config: Config,
        source: Arc<dyn SourceCatalog>,
        target: Arc<dyn TargetExecutor>,
    ) -> Self {
        let ctx = MigrationContext::new(source, target)
            .with_statement_timeout(config.migration.statement_timeout());
        Self { config, ctx }
    }

    /// Run the migration.
    ///
    /// Both connections are closed before this returns, whatever the outcome.
    pub async fn run(self, cancel: CancellationToken, dry_run: bool) -> Result<MigrationReport> {
        let Orchestrator { config, ctx } = self;
        let ctx = ctx.with_cancellation(cancel);

        let result = match config.migration.run_timeout() {
            Some(limit) => {
                match tokio::time::timeout(limit, execute(&ctx, &config, dry_run)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Migration exceeded its {}s deadline", limit.as_secs());
                        Err(MigrateError::Timeout {
                            operation: "migration run".into(),
                            seconds: limit.as_secs(),
                        })
                    }
                }
            }
            None => execute(&ctx, &config, dry_run).await,
        };

        ctx.close().await;
        result
    }

    /// Compare row counts between source and target.
    pub async fn validate(&self) -> Result<IndexMap<String, RowCountCheck>> {
        let ctx = &self.ctx;
        let model = introspect(ctx).await?;
        let excluded = collision_exclusions(&model);
        let mut results = IndexMap::new();

        for table in model.tables.values() {
            if excluded.contains_key(&table.name) {
                continue;
            }
            let source_rows = ctx
                .guard(
                    format!("count {}", table.name),
                    ctx.source.row_count(&table.name),
                )
                .await?;
            let exists = ctx
                .guard(
                    format!("check {}", table.target_name),
                    ctx.target.table_exists(&table.target_name),
                )
                .await?;
            let target_rows = if exists {
                ctx.guard(
                    format!("count {}", table.target_name),
                    ctx.target.row_count(&table.target_name),
                )
                .await?
            } else {
                warn!("{}: target table {} does not exist", table.name, table.target_name);
                0
            };

            let matches = source_rows == target_rows;
            if matches {
                info!("{}: {} rows (match)", table.name, source_rows);
            } else {
                warn!(
                    "{}: source={} target={} (MISMATCH)",
                    table.name, source_rows, target_rows
                );
            }
            results.insert(
                table.name.clone(),
                RowCountCheck {
                    target_name: table.target_name.clone(),
                    source_rows,
                    target_rows,
                    matches,
                },
            );
        }

        Ok(results)
    }

    /// Test both connections.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let ctx = &self.ctx;

        let start = Instant::now();
        let source = ctx.guard("ping source", ctx.source.ping()).await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = ctx.guard("ping target", ctx.target.ping()).await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        Ok(HealthCheckResult {
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.as_ref().err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.as_ref().err().map(|e| e.to_string()),
            healthy: source.is_ok() && target.is_ok(),
        })
    }

    /// Close both connections.
    pub async fn close(&self) {
        self.ctx.close().await;
    }
}

async fn execute(
    ctx: &MigrationContext,
    config: &Config,
    dry_run: bool,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::begin(&config.target.schema);
    info!(
        "Starting migration run: {} ({} -> {})",
        report.run_id,
        ctx.source.db_type(),
        ctx.target.db_type()
    );

    info!("Phase 1: Introspecting source schema");
    let model = introspect(ctx).await?;
    report.identifier_collisions = model.identifier_collisions();

    info!("Phase 2: Checking for duplicate primary keys");
    let audit = audit(ctx, &model).await;
    if !audit.duplicates.is_empty() {
        warn!("Found duplicate primary keys in these tables:");
        for (table, groups) in &audit.duplicates {
            warn!("  {}: {} duplicate sets", table, groups.len());
        }
    }
    report.audit_failures = audit
        .failures
        .into_iter()
        .filter_map(|e| match e {
            MigrateError::AuditQuery { table, message } => Some(AuditFailure { table, message }),
            _ => None,
        })
        .collect();
    report.set_duplicates(audit.duplicates);

    info!("Phase 3: Creating target schema");
    if !dry_run {
        if let Err(e) = ctx
            .guard("create target schema", ctx.target.ensure_schema())
            .await
        {
            warn!(
                "Could not ensure target schema {}: {}",
                config.target.schema, e
            );
            report.schema_error = Some(e.to_string());
        }
    }
    let synthesis = synthesize(ctx, &model, dry_run).await;

    if dry_run {
        report.planned_ddl = synthesis.planned;
        report.tables = synthesis
            .tables
            .into_iter()
            .map(|(source_name, ddl)| TableReport {
                source_name,
                ddl,
                transfer: None,
            })
            .collect();
        report.finish(Some(RunStatus::DryRun));
        info!(
            "Dry run: {} tables, {} statements planned",
            report.totals.tables,
            report.planned_ddl.len()
        );
        return Ok(report);
    }

    info!("Phase 4: Transferring data");
    let eligible: Vec<&TableSchema> = synthesis
        .created()
        .filter_map(|name| model.table(name))
        .collect();
    let engine = TransferEngine::new(
        ctx,
        TransferConfig {
            batch_size: config.migration.batch_size,
            max_row_errors_reported: config.migration.max_row_errors_reported,
        },
    );
    let mut transfers = engine.run(&model, &eligible).await;

    report.tables = synthesis
        .tables
        .into_iter()
        .map(|(source_name, ddl)| {
            let transfer = transfers
                .shift_remove(&source_name)
                .unwrap_or_else(|| TableTransferReport::skipped("table was not created"));
            TableReport {
                source_name,
                ddl,
                transfer: Some(transfer),
            }
        })
        .collect();

    let hint = ctx.is_cancelled().then_some(RunStatus::Cancelled);
    report.finish(hint);

    info!(
        "Migration {}: {} tables, {} rows transferred, {} rows failed in {:.1}s",
        report.status,
        report.totals.tables,
        report.totals.rows_transferred,
        report.totals.rows_failed,
        report.duration_seconds
    );

    Ok(report)
}
