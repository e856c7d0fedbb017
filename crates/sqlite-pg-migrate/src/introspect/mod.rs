//! Schema introspection.
//!
//! Reads the source catalog into a [`SchemaModel`]. Introspection is all or
//! nothing: any catalog read error aborts the run, since acting on a partial
//! model could drop tables or constraints without a trace.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::core::context::MigrationContext;
use crate::core::schema::{ColumnSpec, ForeignKeyRef, OnDeleteAction, SchemaModel, TableSchema};
use crate::core::traits::{RawColumn, RawForeignKey};
use crate::error::{MigrateError, Result};

/// Build the schema model of the source database.
pub async fn introspect(ctx: &MigrationContext) -> Result<SchemaModel> {
    let names = ctx
        .guard("list source tables", ctx.source.list_tables())
        .await
        .map_err(|e| fatal("listing tables", e))?;

    let mut model = SchemaModel::default();

    for name in &names {
        let raw = ctx
            .guard(
                format!("load columns of {}", name),
                ctx.source.load_columns(name),
            )
            .await
            .map_err(|e| fatal(&format!("reading columns of {}", name), e))?;

        let table = build_table(name, raw);
        debug!(
            "{}: {} columns, primary key [{}]",
            name,
            table.columns.len(),
            table.primary_key.join(", ")
        );
        model.tables.insert(name.clone(), table);
    }

    // Foreign keys last: a bare REFERENCES resolves against the referenced
    // table's primary key, which must already be loaded.
    for name in &names {
        let raw = ctx
            .guard(
                format!("load foreign keys of {}", name),
                ctx.source.load_foreign_keys(name),
            )
            .await
            .map_err(|e| fatal(&format!("reading foreign keys of {}", name), e))?;

        let fks = group_foreign_keys(name, raw, &model);
        if !fks.is_empty() {
            model.foreign_keys.insert(name.clone(), fks);
        }
    }

    for collision in model.identifier_collisions() {
        warn!(
            "Tables {} all map to target name {:?}",
            collision.tables.join(", "),
            collision.target_name
        );
    }

    info!(
        "Introspected {} tables, {} foreign keys",
        model.tables.len(),
        model.foreign_key_count()
    );

    Ok(model)
}

/// Deadlines pass through untouched; every other failure is fatal.
fn fatal(context: &str, e: MigrateError) -> MigrateError {
    match e {
        MigrateError::Introspection(_) | MigrateError::Timeout { .. } => e,
        other => MigrateError::Introspection(format!("{}: {}", context, other)),
    }
}

fn build_table(name: &str, mut raw: Vec<RawColumn>) -> TableSchema {
    raw.sort_by_key(|c| c.ordinal);

    let mut pk: Vec<&RawColumn> = raw.iter().filter(|c| c.pk_position > 0).collect();
    pk.sort_by_key(|c| c.pk_position);
    let primary_key = pk.iter().map(|c| c.name.clone()).collect();

    let columns = raw
        .iter()
        .map(|c| ColumnSpec {
            name: c.name.clone(),
            data_type: c.data_type.clone(),
            nullable: !c.not_null,
            default: c.default.clone(),
            ordinal: c.ordinal,
        })
        .collect();

    TableSchema::new(name, columns, primary_key)
}

/// Fold catalog rows into one reference per foreign-key id.
fn group_foreign_keys(
    table: &str,
    raw: Vec<RawForeignKey>,
    model: &SchemaModel,
) -> Vec<ForeignKeyRef> {
    let mut groups: IndexMap<i64, Vec<RawForeignKey>> = IndexMap::new();
    for row in raw {
        groups.entry(row.id).or_default().push(row);
    }

    groups
        .into_values()
        .filter_map(|mut rows| {
            rows.sort_by_key(|r| r.seq);
            let first = rows.first()?.clone();
            let columns: Vec<String> = rows.iter().map(|r| r.from.clone()).collect();

            let ref_columns = if rows.iter().all(|r| r.to.is_some()) {
                rows.iter().filter_map(|r| r.to.clone()).collect()
            } else {
                match model.table(&first.ref_table) {
                    Some(t) if t.primary_key.len() == columns.len() => t.primary_key.clone(),
                    _ => {
                        warn!(
                            "{}: cannot resolve referenced columns of {}; using {}",
                            table,
                            first.ref_table,
                            columns.join(", ")
                        );
                        columns.clone()
                    }
                }
            };

            Some(ForeignKeyRef {
                table: table.to_string(),
                columns,
                ref_table: first.ref_table,
                ref_columns,
                on_delete: OnDeleteAction::parse(first.on_delete.as_deref()),
            })
        })
        .collect()
}
