//! Test doubles: an in-memory SQLite source and a recording target.
//!
//! [`MemoryTarget`] behaves like the PostgreSQL executor where the engine can
//! observe it. Inserts are cast to the column type, NOT NULL, primary keys,
//! unique indexes and foreign keys are enforced, and a batch is all or
//! nothing. DDL can be made to fail by matching its description.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use sqlx::sqlite::SqlitePoolOptions;

use crate::core::ddl::{ColumnDef, DdlStatement, TargetColumn};
use crate::core::traits::TargetExecutor;
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};
use crate::source::SqliteCatalog;
use crate::target::render_ddl;
use crate::typemap::TargetType;

/// Open an in-memory SQLite database and run `statements` against it.
pub async fn sqlite_source(statements: &[&str]) -> SqliteCatalog {
    // One connection that never recycles, or the database is lost.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    for sql in statements {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }
    SqliteCatalog::from_pool(pool)
}

#[derive(Debug, Clone)]
struct ForeignKey {
    name: String,
    columns: Vec<String>,
    ref_table: String,
    ref_columns: Vec<String>,
}

#[derive(Debug, Default)]
struct MemTable {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
    primary_key: Option<Vec<String>>,
    foreign_keys: Vec<ForeignKey>,
}

impl MemTable {
    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    fn positions(&self, columns: &[String]) -> std::result::Result<Vec<usize>, String> {
        columns
            .iter()
            .map(|c| {
                self.position(c)
                    .ok_or_else(|| format!("column \"{}\" does not exist", c))
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    tables: IndexMap<String, MemTable>,
    /// Unique indexes by name: (table, columns).
    indexes: IndexMap<String, (String, Vec<String>)>,
    applied: Vec<DdlStatement>,
    fail_on: Vec<String>,
    schema_failure: Option<String>,
    insert_calls: usize,
    schema_ensured: usize,
    closed: bool,
}

/// In-memory [`TargetExecutor`].
#[derive(Debug, Default)]
pub struct MemoryTarget {
    state: Mutex<State>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every DDL statement whose description contains `pattern`.
    pub fn fail_on(&self, pattern: &str) {
        self.state.lock().unwrap().fail_on.push(pattern.to_string());
    }

    /// Make `ensure_schema` fail with `message`.
    pub fn fail_schema(&self, message: &str) {
        self.state.lock().unwrap().schema_failure = Some(message.to_string());
    }

    /// Successfully applied DDL, in order.
    pub fn applied(&self) -> Vec<DdlStatement> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.state.lock().unwrap().tables.keys().cloned().collect()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn primary_key(&self, table: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .and_then(|t| t.primary_key.clone())
    }

    pub fn foreign_key_names(&self, table: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.foreign_keys.iter().map(|fk| fk.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.state.lock().unwrap().indexes.keys().cloned().collect()
    }

    /// Number of `insert_batch` calls, including rolled back ones.
    pub fn insert_calls(&self) -> usize {
        self.state.lock().unwrap().insert_calls
    }

    pub fn schema_ensured(&self) -> usize {
        self.state.lock().unwrap().schema_ensured
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

/// Cast a value the way `$n::text::<type>` would.
fn cast(value: &SqlValue, ty: TargetType) -> std::result::Result<(), String> {
    let Some(text) = value.to_text() else {
        return Ok(());
    };
    let trimmed = text.trim();
    let ok = match ty {
        TargetType::Text | TargetType::Bytea => true,
        TargetType::Integer => trimmed.parse::<i32>().is_ok(),
        TargetType::Float => trimmed.parse::<f64>().is_ok(),
        TargetType::Boolean => matches!(
            trimmed.to_lowercase().as_str(),
            "t" | "f" | "true" | "false" | "y" | "n" | "yes" | "no" | "on" | "off" | "1" | "0"
        ),
        TargetType::Timestamp => {
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f").is_ok()
                || NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
                || NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok()
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "invalid input syntax for type {}: \"{}\"",
            ty.as_sql().to_lowercase(),
            text
        ))
    }
}

fn key_of(row: &Row, positions: &[usize]) -> Option<Vec<String>> {
    positions
        .iter()
        .map(|&i| row.get(i).and_then(SqlValue::to_text))
        .collect()
}

fn has_duplicates(rows: &[Row], positions: &[usize]) -> bool {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .filter_map(|r| key_of(r, positions))
        .any(|k| !seen.insert(k))
}

impl State {
    fn check_ddl(&self, stmt: &DdlStatement) -> std::result::Result<(), String> {
        let describe = stmt.describe();
        if self.fail_on.iter().any(|p| describe.contains(p.as_str())) {
            return Err(format!("injected failure: {}", describe));
        }
        render_ddl(stmt, "public").map_err(|e| e.to_string())?;
        Ok(())
    }

    fn table(&self, name: &str) -> std::result::Result<&MemTable, String> {
        self.tables
            .get(name)
            .ok_or_else(|| format!("relation \"{}\" does not exist", name))
    }

    fn apply(&mut self, stmt: &DdlStatement) -> std::result::Result<(), String> {
        self.check_ddl(stmt)?;
        match stmt {
            DdlStatement::CreateTable { table, columns } => {
                if !self.tables.contains_key(table) {
                    self.tables.insert(
                        table.clone(),
                        MemTable {
                            columns: columns.clone(),
                            ..Default::default()
                        },
                    );
                }
            }
            DdlStatement::AddPrimaryKey { table, columns } => {
                let t = self.table(table)?;
                if t.primary_key.is_some() {
                    return Err(format!(
                        "multiple primary keys for table \"{}\" are not allowed",
                        table
                    ));
                }
                let positions = t.positions(columns)?;
                if t.rows.iter().any(|r| key_of(r, &positions).is_none()) {
                    return Err("column contains null values".into());
                }
                if has_duplicates(&t.rows, &positions) {
                    return Err(format!(
                        "could not create unique index \"{}_pkey\": key is duplicated",
                        table
                    ));
                }
                let t = self.tables.get_mut(table).ok_or("table vanished")?;
                t.primary_key = Some(columns.clone());
                for &i in &positions {
                    t.columns[i].not_null = true;
                }
            }
            DdlStatement::CreateUniqueIndex {
                name,
                table,
                columns,
            } => {
                if self.indexes.contains_key(name) {
                    return Ok(());
                }
                let t = self.table(table)?;
                let positions = t.positions(columns)?;
                if has_duplicates(&t.rows, &positions) {
                    return Err(format!(
                        "could not create unique index \"{}\": key is duplicated",
                        name
                    ));
                }
                self.indexes
                    .insert(name.clone(), (table.clone(), columns.clone()));
            }
            DdlStatement::AddForeignKey {
                table,
                name,
                columns,
                ref_table,
                ref_columns,
                ..
            } => {
                let t = self.table(table)?;
                if t.foreign_keys.iter().any(|fk| &fk.name == name) {
                    return Err(format!(
                        "constraint \"{}\" for relation \"{}\" already exists",
                        name, table
                    ));
                }
                t.positions(columns)?;
                let r = self.table(ref_table)?;
                r.positions(ref_columns)?;
                let unique = r.primary_key.as_ref() == Some(ref_columns)
                    || self
                        .indexes
                        .values()
                        .any(|(it, ic)| it == ref_table && ic == ref_columns);
                if !unique {
                    return Err(format!(
                        "there is no unique constraint matching given keys for referenced table \"{}\"",
                        ref_table
                    ));
                }
                let fk = ForeignKey {
                    name: name.clone(),
                    columns: columns.clone(),
                    ref_table: ref_table.clone(),
                    ref_columns: ref_columns.clone(),
                };
                self.tables
                    .get_mut(table)
                    .ok_or("table vanished")?
                    .foreign_keys
                    .push(fk);
            }
        }
        self.applied.push(stmt.clone());
        Ok(())
    }

    /// Validate `row` against `table` with `staged` as the table's contents.
    fn check_row(
        &self,
        table: &str,
        t: &MemTable,
        staged: &[Row],
        columns: &[TargetColumn],
        row: &Row,
    ) -> std::result::Result<Row, String> {
        if row.len() != columns.len() {
            return Err("column count mismatch".into());
        }
        let mut full = vec![SqlValue::Null; t.columns.len()];
        for (value, col) in row.iter().zip(columns) {
            let idx = t.position(&col.name).ok_or_else(|| {
                format!("column \"{}\" of relation \"{}\" does not exist", col.name, table)
            })?;
            cast(value, t.columns[idx].ty)?;
            full[idx] = value.clone();
        }
        for (value, def) in full.iter().zip(&t.columns) {
            if def.not_null && value.is_null() {
                return Err(format!(
                    "null value in column \"{}\" violates not-null constraint",
                    def.name
                ));
            }
        }

        let mut unique_keys: Vec<Vec<String>> = t.primary_key.iter().cloned().collect();
        unique_keys.extend(
            self.indexes
                .values()
                .filter(|(it, _)| it == table)
                .map(|(_, ic)| ic.clone()),
        );
        for key in &unique_keys {
            let positions = t.positions(key)?;
            if let Some(k) = key_of(&full, &positions) {
                if staged.iter().any(|r| key_of(r, &positions).as_ref() == Some(&k)) {
                    return Err(format!(
                        "duplicate key value violates unique constraint on \"{}\"",
                        table
                    ));
                }
            }
        }

        for fk in &t.foreign_keys {
            let Some(k) = key_of(&full, &t.positions(&fk.columns)?) else {
                continue;
            };
            let (ref_def, ref_rows): (&MemTable, &[Row]) = if fk.ref_table == table {
                (t, staged)
            } else {
                let r = self.table(&fk.ref_table)?;
                (r, r.rows.as_slice())
            };
            let ref_positions = ref_def.positions(&fk.ref_columns)?;
            let found = ref_rows
                .iter()
                .any(|r| key_of(r, &ref_positions).as_ref() == Some(&k));
            let self_ref = fk.ref_table == table
                && key_of(&full, &ref_positions).as_ref() == Some(&k);
            if !found && !self_ref {
                return Err(format!(
                    "insert or update on table \"{}\" violates foreign key constraint \"{}\"",
                    table, fk.name
                ));
            }
        }
        Ok(full)
    }

    fn insert(
        &mut self,
        table: &str,
        columns: &[TargetColumn],
        rows: &[Row],
    ) -> std::result::Result<u64, String> {
        self.insert_calls += 1;
        let t = self.table(table)?;
        let mut staged = t.rows.clone();
        for row in rows {
            let full = self.check_row(table, t, &staged, columns, row)?;
            staged.push(full);
        }
        self.tables.get_mut(table).ok_or("table vanished")?.rows = staged;
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl TargetExecutor for MemoryTarget {
    async fn ensure_schema(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.schema_ensured += 1;
        match &state.schema_failure {
            Some(message) => Err(MigrateError::Config(message.clone())),
            None => Ok(()),
        }
    }

    async fn apply(&self, stmt: &DdlStatement) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .apply(stmt)
            .map_err(|e| MigrateError::constraint(stmt.table(), e))
    }

    fn render(&self, stmt: &DdlStatement) -> Result<String> {
        render_ddl(stmt, "public")
    }

    async fn has_primary_key(&self, table: &str) -> Result<bool> {
        Ok(self.primary_key(table).is_some())
    }

    async fn constraint_exists(&self, table: &str, name: &str) -> Result<bool> {
        Ok(self.foreign_key_names(table).iter().any(|n| n == name))
    }

    async fn insert_batch(
        &self,
        table: &str,
        columns: &[TargetColumn],
        rows: &[Row],
    ) -> Result<u64> {
        self.state
            .lock()
            .unwrap()
            .insert(table, columns, rows)
            .map_err(|message| MigrateError::RowTransfer {
                table: table.to_string(),
                row: 0,
                message,
            })
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().tables.contains_key(table))
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        let t = state
            .table(table)
            .map_err(|e| MigrateError::constraint(table, e))?;
        Ok(t.rows.len() as i64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}
