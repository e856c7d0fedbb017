//! Run report.
//!
//! Every table-, constraint- and row-local failure of a run ends up here, so
//! nothing is dropped without an entry.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::core::schema::{DuplicateGroup, DuplicateReport, IdentifierCollision};
use crate::error::Result;

/// Result of one DDL or transfer step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Nothing to do; the target already had it.
    AlreadyPresent,
    /// The primary operation failed and the fallback succeeded.
    FallbackUsed { reason: String },
    Failed { reason: String },
    /// Not attempted.
    Skipped { reason: String },
}

impl Outcome {
    pub fn failed(reason: impl ToString) -> Self {
        Outcome::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn skipped(reason: impl ToString) -> Self {
        Outcome::Skipped {
            reason: reason.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Outcome of one foreign key in pass 3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyOutcome {
    /// Constraint name.
    pub name: String,
    /// `table(cols) -> ref_table(cols)`.
    pub references: String,
    pub outcome: Outcome,
}

/// DDL outcomes of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDdlReport {
    pub target_name: String,
    pub creation: Outcome,
    /// `None` for tables without a primary key.
    pub primary_key: Option<Outcome>,
    pub foreign_keys: Vec<ForeignKeyOutcome>,
}

impl TableDdlReport {
    pub fn new(target_name: impl Into<String>, creation: Outcome) -> Self {
        Self {
            target_name: target_name.into(),
            creation,
            primary_key: None,
            foreign_keys: Vec::new(),
        }
    }
}

/// A row that could not be inserted even on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    /// 1-based position in source read order.
    pub row: u64,
    pub message: String,
}

/// Data transfer statistics of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableTransferReport {
    pub outcome: Outcome,
    pub rows_read: u64,
    pub rows_transferred: u64,
    pub rows_failed: u64,
    pub batches: u64,
    /// Batches that were rolled back and retried row by row.
    pub fallback_batches: u64,
    /// First failures only; `rows_failed` stays exact.
    pub row_failures: Vec<RowFailure>,
}

impl TableTransferReport {
    pub fn new() -> Self {
        Self {
            outcome: Outcome::Success,
            rows_read: 0,
            rows_transferred: 0,
            rows_failed: 0,
            batches: 0,
            fallback_batches: 0,
            row_failures: Vec::new(),
        }
    }

    pub fn skipped(reason: impl ToString) -> Self {
        Self {
            outcome: Outcome::skipped(reason),
            ..Self::new()
        }
    }
}

impl Default for TableTransferReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything known about one source table at run end.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub source_name: String,
    #[serde(flatten)]
    pub ddl: TableDdlReport,
    /// `None` in dry runs.
    pub transfer: Option<TableTransferReport>,
}

impl TableReport {
    pub fn has_errors(&self) -> bool {
        self.ddl.creation.is_failed()
            || self.ddl.primary_key.as_ref().is_some_and(Outcome::is_failed)
            || self.ddl.foreign_keys.iter().any(|fk| fk.outcome.is_failed())
            || self
                .transfer
                .as_ref()
                .is_some_and(|t| t.outcome.is_failed() || t.rows_failed > 0)
    }
}

/// Duplicate findings of one table.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateSummary {
    pub groups: usize,
    pub entries: Vec<DuplicateGroup>,
}

/// A table whose duplicate check could not run.
#[derive(Debug, Clone, Serialize)]
pub struct AuditFailure {
    pub table: String,
    pub message: String,
}

/// Final run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
    Cancelled,
    DryRun,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Cancelled => "cancelled",
            RunStatus::DryRun => "dry_run",
        };
        f.write_str(s)
    }
}

/// Run-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub tables: usize,
    pub tables_created: usize,
    pub tables_with_errors: usize,
    pub primary_keys_enforced: usize,
    pub primary_key_fallbacks: usize,
    pub foreign_keys_present: usize,
    pub foreign_keys_failed: usize,
    pub duplicate_tables: usize,
    pub rows_read: u64,
    pub rows_transferred: u64,
    pub rows_failed: u64,
}

/// Report of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    pub status: RunStatus,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub target_schema: String,

    /// Why the target schema could not be ensured, if it could not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_error: Option<String>,

    /// Tables with duplicate primary keys in the source.
    pub duplicates: IndexMap<String, DuplicateSummary>,

    pub audit_failures: Vec<AuditFailure>,

    pub identifier_collisions: Vec<IdentifierCollision>,

    pub tables: Vec<TableReport>,

    /// Rendered DDL, dry runs only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_ddl: Vec<String>,

    pub totals: Totals,
}

impl MigrationReport {
    /// Start a report for a new run.
    pub fn begin(target_schema: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            status: RunStatus::Completed,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_seconds: 0.0,
            target_schema: target_schema.into(),
            schema_error: None,
            duplicates: IndexMap::new(),
            audit_failures: Vec::new(),
            identifier_collisions: Vec::new(),
            tables: Vec::new(),
            planned_ddl: Vec::new(),
            totals: Totals::default(),
        }
    }

    pub fn set_duplicates(&mut self, report: DuplicateReport) {
        self.duplicates = report
            .into_iter()
            .map(|(table, entries)| {
                let summary = DuplicateSummary {
                    groups: entries.len(),
                    entries,
                };
                (table, summary)
            })
            .collect();
    }

    /// Stamp completion time, compute totals and pick the final status.
    ///
    /// `hint` forces the status of cancelled and dry runs.
    pub fn finish(&mut self, hint: Option<RunStatus>) {
        self.completed_at = Utc::now();
        self.duration_seconds =
            (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.totals = self.compute_totals();

        self.status = match hint {
            Some(status) => status,
            None if self.totals.tables_with_errors > 0
                || !self.audit_failures.is_empty()
                || self.schema_error.is_some() =>
            {
                RunStatus::CompletedWithErrors
            }
            None => RunStatus::Completed,
        };
    }

    fn compute_totals(&self) -> Totals {
        let mut totals = Totals {
            tables: self.tables.len(),
            duplicate_tables: self.duplicates.len(),
            ..Totals::default()
        };

        for table in &self.tables {
            if table.ddl.creation == Outcome::Success {
                totals.tables_created += 1;
            }
            if table.has_errors() {
                totals.tables_with_errors += 1;
            }
            match &table.ddl.primary_key {
                Some(Outcome::Success | Outcome::AlreadyPresent) => {
                    totals.primary_keys_enforced += 1
                }
                Some(Outcome::FallbackUsed { .. }) => totals.primary_key_fallbacks += 1,
                _ => {}
            }
            for fk in &table.ddl.foreign_keys {
                match fk.outcome {
                    Outcome::Success | Outcome::AlreadyPresent => totals.foreign_keys_present += 1,
                    Outcome::Failed { .. } => totals.foreign_keys_failed += 1,
                    _ => {}
                }
            }
            if let Some(t) = &table.transfer {
                totals.rows_read += t.rows_read;
                totals.rows_transferred += t.rows_transferred;
                totals.rows_failed += t.rows_failed;
            }
        }

        totals
    }

    /// Serialize the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
