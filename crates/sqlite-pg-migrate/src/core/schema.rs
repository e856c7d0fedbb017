//! Normalized schema model built by introspection.
//!
//! The model is built once per run and read-only afterwards. Maps are
//! [`IndexMap`]s so every pass visits tables in source enumeration order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::identifier::{sanitize, truncate_identifier};
use super::value::SqlValue;

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Raw source column name.
    pub name: String,

    /// Declared source type, free-form (may be empty in SQLite).
    pub data_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Default expression, verbatim.
    pub default: Option<String>,

    /// Ordinal position (0-based, as reported by the source).
    pub ordinal: i32,
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Source table name.
    pub name: String,

    /// Columns in target column order.
    pub columns: Vec<ColumnSpec>,

    /// Primary key column names in key order. May be empty.
    pub primary_key: Vec<String>,

    /// Sanitized target table name.
    pub target_name: String,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>, primary_key: Vec<String>) -> Self {
        let name = name.into();
        let target_name = sanitize(&name);
        Self {
            name,
            columns,
            primary_key,
            target_name,
        }
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Name of the unique index used when the primary key cannot be added.
    pub fn pk_index_name(&self) -> String {
        truncate_identifier(format!("idx_{}_pk", self.target_name))
    }
}

/// ON DELETE action of a foreign key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnDeleteAction {
    Cascade,
    SetNull,
    Restrict,
    #[default]
    NoAction,
}

impl OnDeleteAction {
    /// Parse a catalog action string. Unknown or missing actions are NO ACTION.
    pub fn parse(raw: Option<&str>) -> Self {
        let normalized = raw
            .unwrap_or_default()
            .trim()
            .to_uppercase()
            .replace('_', " ");
        match normalized.as_str() {
            "CASCADE" => OnDeleteAction::Cascade,
            "SET NULL" => OnDeleteAction::SetNull,
            "RESTRICT" => OnDeleteAction::Restrict,
            _ => OnDeleteAction::NoAction,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDeleteAction::Cascade => "CASCADE",
            OnDeleteAction::SetNull => "SET NULL",
            OnDeleteAction::Restrict => "RESTRICT",
            OnDeleteAction::NoAction => "NO ACTION",
        }
    }
}

/// Foreign key owned by one table.
///
/// `columns[i]` references `ref_columns[i]`; single-column keys are the
/// one-element case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Owning (source) table name.
    pub table: String,

    /// Local column names.
    pub columns: Vec<String>,

    /// Referenced (source) table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    pub on_delete: OnDeleteAction,
}

impl ForeignKeyRef {
    /// (local, referenced) column pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.ref_columns.iter().map(String::as_str))
    }

    /// Deterministic constraint name:
    /// `fk_<table>_<local cols>_<ref table>_<ref cols>`, all sanitized and
    /// truncated to the PostgreSQL identifier limit.
    pub fn constraint_name(&self) -> String {
        let join = |cols: &[String]| {
            cols.iter()
                .map(|c| sanitize(c))
                .collect::<Vec<_>>()
                .join("_")
        };
        truncate_identifier(format!(
            "fk_{}_{}_{}_{}",
            sanitize(&self.table),
            join(&self.columns),
            sanitize(&self.ref_table),
            join(&self.ref_columns)
        ))
    }

    /// Human-readable description for logs and reports.
    pub fn describe(&self) -> String {
        format!(
            "{}({}) -> {}({})",
            self.table,
            self.columns.join(", "),
            self.ref_table,
            self.ref_columns.join(", ")
        )
    }
}

/// Source tables whose sanitized names coincide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierCollision {
    pub target_name: String,

    /// Source tables in enumeration order; the first one keeps the name.
    pub tables: Vec<String>,
}

/// The full normalized schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaModel {
    /// Source table name to table schema, in enumeration order.
    pub tables: IndexMap<String, TableSchema>,

    /// Source table name to the foreign keys it owns.
    pub foreign_keys: IndexMap<String, Vec<ForeignKeyRef>>,
}

impl SchemaModel {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Foreign keys owned by `table`.
    pub fn foreign_keys_of(&self, table: &str) -> &[ForeignKeyRef] {
        self.foreign_keys
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn foreign_key_count(&self) -> usize {
        self.foreign_keys.values().map(Vec::len).sum()
    }

    /// Every target name shared by more than one source table.
    pub fn identifier_collisions(&self) -> Vec<IdentifierCollision> {
        let mut by_target: IndexMap<&str, Vec<String>> = IndexMap::new();
        for table in self.tables.values() {
            by_target
                .entry(table.target_name.as_str())
                .or_default()
                .push(table.name.clone());
        }

        by_target
            .into_iter()
            .filter(|(_, tables)| tables.len() > 1)
            .map(|(target, tables)| IdentifierCollision {
                target_name: target.to_string(),
                tables,
            })
            .collect()
    }
}

/// One primary-key value occurring more than once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    /// Key tuple, in primary key column order.
    pub key: Vec<SqlValue>,
    pub count: i64,
}

/// Table name to its duplicate groups. Only tables with duplicates appear.
pub type DuplicateReport = IndexMap<String, Vec<DuplicateGroup>>;
