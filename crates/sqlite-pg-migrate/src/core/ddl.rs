//! Engine-neutral DDL statements emitted by the schema synthesizer.
//!
//! Statements carry target table names (already sanitized) and raw column
//! names. Turning them into SQL is the target executor's job.

use serde::Serialize;

use super::schema::{OnDeleteAction, TableSchema};
use crate::typemap::{map_column, TargetType};

/// A column in a CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: TargetType,
    pub not_null: bool,
    /// Default expression copied verbatim from the source.
    pub default: Option<String>,
}

/// Target column description used by inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetColumn {
    pub name: String,
    pub ty: TargetType,
}

/// One DDL operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DdlStatement {
    /// Always create-if-absent.
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    AddPrimaryKey {
        table: String,
        columns: Vec<String>,
    },
    /// Always create-if-absent.
    CreateUniqueIndex {
        name: String,
        table: String,
        columns: Vec<String>,
    },
    AddForeignKey {
        table: String,
        name: String,
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
        on_delete: OnDeleteAction,
    },
}

impl DdlStatement {
    /// Build the CREATE TABLE statement for a source table.
    pub fn create_table(table: &TableSchema) -> Self {
        DdlStatement::CreateTable {
            table: table.target_name.clone(),
            columns: table
                .columns
                .iter()
                .map(|c| ColumnDef {
                    name: c.name.clone(),
                    ty: map_column(c).target_type,
                    not_null: !c.nullable,
                    default: c.default.clone(),
                })
                .collect(),
        }
    }

    /// Target table the statement acts on.
    pub fn table(&self) -> &str {
        match self {
            DdlStatement::CreateTable { table, .. }
            | DdlStatement::AddPrimaryKey { table, .. }
            | DdlStatement::CreateUniqueIndex { table, .. }
            | DdlStatement::AddForeignKey { table, .. } => table,
        }
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            DdlStatement::CreateTable { table, .. } => format!("create table {}", table),
            DdlStatement::AddPrimaryKey { table, columns } => {
                format!("primary key on {}({})", table, columns.join(", "))
            }
            DdlStatement::CreateUniqueIndex { name, table, .. } => {
                format!("unique index {} on {}", name, table)
            }
            DdlStatement::AddForeignKey { name, .. } => format!("foreign key {}", name),
        }
    }
}

/// Target column list for inserting into a table.
pub fn target_columns(table: &TableSchema) -> Vec<TargetColumn> {
    table
        .columns
        .iter()
        .map(|c| TargetColumn {
            name: c.name.clone(),
            ty: map_column(c).target_type,
        })
        .collect()
}
