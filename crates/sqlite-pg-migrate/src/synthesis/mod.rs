//! Schema synthesis in three passes.
//!
//! 1. Create every table (create-if-absent, columns only).
//! 2. Add primary keys, falling back to a unique index named `idx_<table>_pk`.
//! 3. Add foreign keys under deterministic names.
//!
//! Constraints are deferred until every table exists, so forward and
//! circular references need no creation order. Each failure is recorded
//! against its table and the pass moves on.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::core::context::MigrationContext;
use crate::core::ddl::DdlStatement;
use crate::core::identifier::sanitize;
use crate::core::schema::{ForeignKeyRef, SchemaModel, TableSchema};
use crate::error::{MigrateError, Result};
use crate::orchestrator::report::{ForeignKeyOutcome, Outcome, TableDdlReport};
use crate::typemap::map_column;

const DRY_RUN: &str = "dry run";

/// DDL outcomes per source table, plus the rendered SQL of a dry run.
#[derive(Debug, Default)]
pub struct SynthesisResult {
    pub tables: IndexMap<String, TableDdlReport>,
    pub planned: Vec<String>,
}

impl SynthesisResult {
    /// Source tables whose target table exists (or would, in a dry run).
    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .filter(|(_, t)| is_created(&t.creation))
            .map(|(name, _)| name.as_str())
    }
}

fn is_created(outcome: &Outcome) -> bool {
    match outcome {
        Outcome::Success | Outcome::AlreadyPresent => true,
        Outcome::Skipped { reason } => reason == DRY_RUN,
        _ => false,
    }
}

/// Source tables that lose a target-name collision, with the reason.
///
/// The first table in model order keeps the name.
pub fn collision_exclusions(model: &SchemaModel) -> IndexMap<String, String> {
    let mut excluded = IndexMap::new();
    for collision in model.identifier_collisions() {
        let (winner, losers) = match collision.tables.split_first() {
            Some(split) => split,
            None => continue,
        };
        for loser in losers {
            excluded.insert(
                loser.clone(),
                format!(
                    "target name {:?} is already used by table {}",
                    collision.target_name, winner
                ),
            );
        }
    }
    excluded
}

/// Run all three passes against the target.
///
/// With `dry_run` set nothing is executed; every statement that would run is
/// rendered into [`SynthesisResult::planned`].
pub async fn synthesize(
    ctx: &MigrationContext,
    model: &SchemaModel,
    dry_run: bool,
) -> SynthesisResult {
    let mut result = SynthesisResult::default();
    let excluded = collision_exclusions(model);

    info!("Pass 1: creating {} tables", model.tables.len());
    for (name, table) in &model.tables {
        let creation = match excluded.get(name) {
            Some(reason) => {
                warn!("Skipping table {}: {}", name, reason);
                Outcome::failed(reason)
            }
            None => create_table(ctx, table, dry_run, &mut result.planned).await,
        };
        result
            .tables
            .insert(name.clone(), TableDdlReport::new(&table.target_name, creation));
    }

    let created: HashSet<String> = result.created().map(str::to_string).collect();

    info!("Pass 2: adding primary keys");
    for (name, table) in model.tables.iter().filter(|(_, t)| t.has_pk()) {
        let outcome = if created.contains(name) {
            add_primary_key(ctx, table, dry_run, &mut result.planned).await
        } else {
            Outcome::skipped("table was not created")
        };
        if let Some(report) = result.tables.get_mut(name) {
            report.primary_key = Some(outcome);
        }
    }

    info!("Pass 3: adding {} foreign keys", model.foreign_key_count());
    for (name, fks) in &model.foreign_keys {
        for fk in fks {
            let outcome = if !created.contains(name) {
                Outcome::skipped("table was not created")
            } else if model.table(&fk.ref_table).is_some() && !created.contains(&fk.ref_table) {
                Outcome::skipped(format!(
                    "referenced table {} was not created",
                    fk.ref_table
                ))
            } else {
                add_foreign_key(ctx, model, fk, dry_run, &mut result.planned).await
            };
            if let Some(report) = result.tables.get_mut(name) {
                report.foreign_keys.push(ForeignKeyOutcome {
                    name: fk.constraint_name(),
                    references: fk.describe(),
                    outcome,
                });
            }
        }
    }

    result
}

/// Render or execute one statement.
async fn execute(
    ctx: &MigrationContext,
    stmt: &DdlStatement,
    dry_run: bool,
    planned: &mut Vec<String>,
) -> Result<()> {
    if dry_run {
        planned.push(ctx.target.render(stmt)?);
        return Ok(());
    }
    ctx.guard(stmt.describe(), ctx.target.apply(stmt))
        .await
        .map_err(|e| match e {
            MigrateError::ConstraintApplication { .. } => e,
            other => MigrateError::constraint(stmt.table(), other),
        })
}

fn applied(dry_run: bool) -> Outcome {
    if dry_run {
        Outcome::skipped(DRY_RUN)
    } else {
        Outcome::Success
    }
}

async fn create_table(
    ctx: &MigrationContext,
    table: &TableSchema,
    dry_run: bool,
    planned: &mut Vec<String>,
) -> Outcome {
    for col in &table.columns {
        if let Some(warning) = map_column(col).warning {
            debug!("{}.{}: {}", table.name, col.name, warning);
        }
    }

    let stmt = DdlStatement::create_table(table);
    match execute(ctx, &stmt, dry_run, planned).await {
        Ok(()) => {
            if !dry_run {
                info!("Created table: {}", table.target_name);
            }
            applied(dry_run)
        }
        Err(e) => {
            warn!("Error creating table {}: {}", table.target_name, e);
            Outcome::failed(e)
        }
    }
}

async fn add_primary_key(
    ctx: &MigrationContext,
    table: &TableSchema,
    dry_run: bool,
    planned: &mut Vec<String>,
) -> Outcome {
    if !dry_run {
        match ctx
            .guard(
                format!("check primary key of {}", table.target_name),
                ctx.target.has_primary_key(&table.target_name),
            )
            .await
        {
            Ok(true) => {
                debug!("{} already has a primary key", table.target_name);
                return Outcome::AlreadyPresent;
            }
            Ok(false) => {}
            Err(e) => warn!(
                "Could not check primary key of {}: {}",
                table.target_name, e
            ),
        }
    }

    let pk = DdlStatement::AddPrimaryKey {
        table: table.target_name.clone(),
        columns: table.primary_key.clone(),
    };
    let pk_error = match execute(ctx, &pk, dry_run, planned).await {
        Ok(()) => {
            if !dry_run {
                info!(
                    "Added primary key to {}: {}",
                    table.target_name,
                    table.primary_key.join(", ")
                );
            }
            return applied(dry_run);
        }
        Err(e) => e,
    };

    warn!(
        "Error adding primary key to {}: {}; creating unique index instead",
        table.target_name, pk_error
    );
    let index = DdlStatement::CreateUniqueIndex {
        name: table.pk_index_name(),
        table: table.target_name.clone(),
        columns: table.primary_key.clone(),
    };
    match execute(ctx, &index, dry_run, planned).await {
        Ok(()) => {
            info!(
                "Created unique index on {}: {}",
                table.target_name,
                table.primary_key.join(", ")
            );
            Outcome::FallbackUsed {
                reason: pk_error.to_string(),
            }
        }
        Err(e) => {
            warn!(
                "Error creating unique index on {}: {}",
                table.target_name, e
            );
            Outcome::failed(format!("primary key: {}; unique index: {}", pk_error, e))
        }
    }
}

async fn add_foreign_key(
    ctx: &MigrationContext,
    model: &SchemaModel,
    fk: &ForeignKeyRef,
    dry_run: bool,
    planned: &mut Vec<String>,
) -> Outcome {
    let table = target_name(model, &fk.table);
    let name = fk.constraint_name();

    if !dry_run {
        match ctx
            .guard(
                format!("check constraint {}", name),
                ctx.target.constraint_exists(&table, &name),
            )
            .await
        {
            Ok(true) => {
                debug!("Foreign key {} already exists", name);
                return Outcome::AlreadyPresent;
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check constraint {}: {}", name, e),
        }
    }

    let stmt = DdlStatement::AddForeignKey {
        table,
        name,
        columns: fk.columns.clone(),
        ref_table: target_name(model, &fk.ref_table),
        ref_columns: fk.ref_columns.clone(),
        on_delete: fk.on_delete,
    };
    match execute(ctx, &stmt, dry_run, planned).await {
        Ok(()) => {
            if !dry_run {
                info!("Added foreign key: {}", fk.describe());
            }
            applied(dry_run)
        }
        Err(e) => {
            warn!("Error adding foreign key {}: {}", fk.describe(), e);
            Outcome::failed(e)
        }
    }
}

/// Target name of a source table, also for tables missing from the model.
fn target_name(model: &SchemaModel, table: &str) -> String {
    model
        .table(table)
        .map(|t| t.target_name.clone())
        .unwrap_or_else(|| sanitize(table))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::schema::{ColumnSpec, OnDeleteAction};
    use crate::introspect::introspect;
    use crate::testing::{sqlite_source, MemoryTarget};

    async fn setup(statements: &[&str]) -> (MigrationContext, Arc<MemoryTarget>, SchemaModel) {
        let source = sqlite_source(statements).await;
        let target = Arc::new(MemoryTarget::new());
        let ctx = MigrationContext::new(Arc::new(source), target.clone());
        let model = introspect(&ctx).await.unwrap();
        (ctx, target, model)
    }

    const ORDERS_FIRST: &[&str] = &[
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER \
         REFERENCES customers (id) ON DELETE CASCADE)",
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT)",
    ];

    #[tokio::test]
    async fn test_three_passes() {
        let (ctx, target, model) = setup(ORDERS_FIRST).await;
        let result = synthesize(&ctx, &model, false).await;

        let orders = &result.tables["orders"];
        assert_eq!(orders.creation, Outcome::Success);
        assert_eq!(orders.primary_key, Some(Outcome::Success));
        assert_eq!(orders.foreign_keys.len(), 1);
        assert_eq!(orders.foreign_keys[0].outcome, Outcome::Success);
        assert_eq!(
            orders.foreign_keys[0].name,
            "fk_orders_customer_id_customers_id"
        );

        assert_eq!(target.primary_key("customers"), Some(vec!["id".to_string()]));
        assert_eq!(
            target.foreign_key_names("orders"),
            vec!["fk_orders_customer_id_customers_id".to_string()]
        );
        assert!(result.planned.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_keys_wait_for_all_tables() {
        let (ctx, target, model) = setup(ORDERS_FIRST).await;
        synthesize(&ctx, &model, false).await;

        let applied = target.applied();
        let last_create = applied
            .iter()
            .rposition(|s| matches!(s, DdlStatement::CreateTable { .. }))
            .unwrap();
        let first_fk = applied
            .iter()
            .position(|s| matches!(s, DdlStatement::AddForeignKey { .. }))
            .unwrap();
        let last_pk = applied
            .iter()
            .rposition(|s| matches!(s, DdlStatement::AddPrimaryKey { .. }))
            .unwrap();
        assert!(last_create < first_fk);
        assert!(last_pk < first_fk);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let (ctx, target, model) = setup(ORDERS_FIRST).await;
        synthesize(&ctx, &model, false).await;
        let first_count = target.applied().len();

        let second = synthesize(&ctx, &model, false).await;
        let orders = &second.tables["orders"];
        assert_eq!(orders.creation, Outcome::Success);
        assert_eq!(orders.primary_key, Some(Outcome::AlreadyPresent));
        assert_eq!(orders.foreign_keys[0].outcome, Outcome::AlreadyPresent);
        assert_eq!(target.foreign_key_names("orders").len(), 1);
        // Only the two create-if-absent statements ran again.
        assert_eq!(target.applied().len(), first_count + 2);
    }

    #[tokio::test]
    async fn test_long_foreign_key_names_stay_distinct() {
        let (ctx, target, model) = setup(&[
            "CREATE TABLE customer_shipping_address_history_records (id INTEGER PRIMARY KEY)",
            "CREATE TABLE order_fulfillment_shipment_tracking_events (id INTEGER PRIMARY KEY, \
             customer_shipping_address_history_ref_1 INTEGER \
             REFERENCES customer_shipping_address_history_records (id), \
             customer_shipping_address_history_ref_2 INTEGER \
             REFERENCES customer_shipping_address_history_records (id))",
        ])
        .await;

        let result = synthesize(&ctx, &model, false).await;
        let events = &result.tables["order_fulfillment_shipment_tracking_events"];
        assert_eq!(events.foreign_keys.len(), 2);
        assert!(events
            .foreign_keys
            .iter()
            .all(|fk| fk.outcome == Outcome::Success));
        assert_ne!(events.foreign_keys[0].name, events.foreign_keys[1].name);

        let names = target.foreign_key_names("order_fulfillment_shipment_tracking_events");
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.len() <= 63));
    }

    #[tokio::test]
    async fn test_primary_key_falls_back_to_unique_index() {
        let (ctx, target, model) = setup(ORDERS_FIRST).await;
        target.fail_on("primary key on customers");

        let result = synthesize(&ctx, &model, false).await;
        let customers = &result.tables["customers"];
        assert!(matches!(
            customers.primary_key,
            Some(Outcome::FallbackUsed { .. })
        ));
        assert!(target
            .index_names()
            .contains(&"idx_customers_pk".to_string()));
        // The unique index still satisfies the reference.
        assert_eq!(
            result.tables["orders"].foreign_keys[0].outcome,
            Outcome::Success
        );
    }

    #[tokio::test]
    async fn test_failed_fallback_is_reported() {
        let (ctx, target, model) = setup(ORDERS_FIRST).await;
        target.fail_on("primary key on customers");
        target.fail_on("unique index idx_customers_pk");

        let result = synthesize(&ctx, &model, false).await;
        let Some(Outcome::Failed { reason }) = &result.tables["customers"].primary_key else {
            panic!("expected failed primary key");
        };
        assert!(reason.contains("unique index"));
        assert!(result.tables["orders"].foreign_keys[0].outcome.is_failed());
    }

    #[tokio::test]
    async fn test_failed_table_is_skipped_in_later_passes() {
        let (ctx, target, model) = setup(ORDERS_FIRST).await;
        target.fail_on("create table orders");

        let result = synthesize(&ctx, &model, false).await;
        let orders = &result.tables["orders"];
        assert!(orders.creation.is_failed());
        assert!(matches!(orders.primary_key, Some(Outcome::Skipped { .. })));
        assert!(matches!(
            orders.foreign_keys[0].outcome,
            Outcome::Skipped { .. }
        ));
        assert_eq!(result.tables["customers"].creation, Outcome::Success);
        assert_eq!(target.table_names(), vec!["customers".to_string()]);
    }

    #[tokio::test]
    async fn test_dangling_reference_fails_alone() {
        let (ctx, _target, model) = setup(&[
            "CREATE TABLE a (id INTEGER PRIMARY KEY, gone_id INTEGER REFERENCES gone (id))",
            "CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a (id))",
        ])
        .await;

        let result = synthesize(&ctx, &model, false).await;
        assert!(result.tables["a"].foreign_keys[0].outcome.is_failed());
        assert_eq!(result.tables["b"].foreign_keys[0].outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_collision_loser_is_excluded() {
        let (ctx, target, model) = setup(&[
            "CREATE TABLE \"Order Items\" (id INTEGER)",
            "CREATE TABLE orderitems (id INTEGER, extra TEXT)",
        ])
        .await;

        let result = synthesize(&ctx, &model, false).await;
        assert_eq!(result.tables["Order Items"].creation, Outcome::Success);
        let Outcome::Failed { reason } = &result.tables["orderitems"].creation else {
            panic!("expected collision failure");
        };
        assert!(reason.contains("Order Items"));
        assert_eq!(target.table_names(), vec!["orderitems".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_renders_without_executing() {
        let (ctx, target, model) = setup(ORDERS_FIRST).await;
        let result = synthesize(&ctx, &model, true).await;

        assert!(target.applied().is_empty());
        assert_eq!(result.planned.len(), 5);
        assert!(result.planned[0].starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"orders\""));
        assert!(result.planned[4].ends_with("ON DELETE CASCADE"));
        assert_eq!(
            result.tables["orders"].creation,
            Outcome::skipped("dry run")
        );
    }

    #[tokio::test]
    async fn test_unsanitizable_table_name_fails() {
        let source = sqlite_source(&[]).await;
        let target = Arc::new(MemoryTarget::new());
        let ctx = MigrationContext::new(Arc::new(source), target.clone());

        let mut model = SchemaModel::default();
        let table = TableSchema::new(
            "表",
            vec![ColumnSpec {
                name: "id".into(),
                data_type: "INTEGER".into(),
                nullable: false,
                default: None,
                ordinal: 0,
            }],
            vec!["id".into()],
        );
        assert_eq!(table.target_name, "");
        model.tables.insert("表".into(), table);
        model.foreign_keys.insert(
            "表".into(),
            vec![ForeignKeyRef {
                table: "表".into(),
                columns: vec!["id".into()],
                ref_table: "表".into(),
                ref_columns: vec!["id".into()],
                on_delete: OnDeleteAction::NoAction,
            }],
        );

        let result = synthesize(&ctx, &model, false).await;
        let report = &result.tables["表"];
        assert!(report.creation.is_failed());
        assert!(matches!(report.primary_key, Some(Outcome::Skipped { .. })));
        assert!(target.table_names().is_empty());
    }
}
