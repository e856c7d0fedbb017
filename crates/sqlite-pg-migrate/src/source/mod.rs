//! SQLite source catalog.
//!
//! Implements [`SourceCatalog`] on top of an sqlx SQLite pool. Metadata comes
//! from `sqlite_master` and the `pragma_table_info` / `pragma_foreign_key_list`
//! table-valued functions. Row values are decoded by their storage class, not
//! by the declared column type, since SQLite does not enforce the latter.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, TypeInfo, ValueRef};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::identifier::{quote_ident, quote_list};
use crate::core::traits::{RawColumn, RawForeignKey, ReadOptions, SourceCatalog};
use crate::core::value::{Batch, Row, SqlValue};
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Batches buffered between the reader task and the consumer.
const READ_AHEAD_BATCHES: usize = 4;

const LIST_TABLES_SQL: &str = r"
    SELECT name FROM sqlite_master
    WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
";

const TABLE_INFO_SQL: &str = r#"
    SELECT cid, name, type, "notnull", dflt_value, pk
    FROM pragma_table_info(?1)
    ORDER BY cid
"#;

const FOREIGN_KEY_LIST_SQL: &str = r#"
    SELECT id, seq, "table", "from", "to", on_delete
    FROM pragma_foreign_key_list(?1)
    ORDER BY id, seq
"#;

/// SQLite source catalog with a single read-only connection.
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open the configured database file read-only.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .read_only(true)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await?;

        // Test connection
        sqlx::query("SELECT 1").fetch_one(&pool).await?;

        info!("Connected to SQLite source: {}", config.path.display());

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Decode one column of a row by its storage class.
    fn decode_value(row: &SqliteRow, idx: usize) -> Result<SqlValue> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(SqlValue::Null);
        }
        let class = raw.type_info().name().to_string();

        let value = match class.as_str() {
            "INTEGER" => SqlValue::I64(row.try_get_unchecked::<i64, _>(idx)?),
            "REAL" => SqlValue::F64(row.try_get_unchecked::<f64, _>(idx)?),
            "BLOB" => SqlValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
            _ => SqlValue::Text(row.try_get_unchecked::<String, _>(idx)?),
        };
        Ok(value)
    }

    fn decode_row(row: &SqliteRow) -> Result<Row> {
        (0..row.len()).map(|i| Self::decode_value(row, i)).collect()
    }

    async fn read_table_impl(
        pool: SqlitePool,
        opts: ReadOptions,
        tx: mpsc::Sender<Result<Batch>>,
    ) -> Result<()> {
        let query = format!(
            "SELECT {} FROM {}",
            quote_list(&opts.columns)?,
            quote_ident(&opts.table)?
        );
        debug!("Reading {}: {}", opts.table, query);

        let batch_size = opts.batch_size.max(1);
        let mut rows = sqlx::query(&query).fetch(&pool);
        let mut buffer = Vec::with_capacity(batch_size);
        let mut next_row: u64 = 1;

        while let Some(row) = rows.try_next().await? {
            buffer.push(Self::decode_row(&row)?);
            if buffer.len() == batch_size {
                let full = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
                let count = full.len() as u64;
                if tx.send(Ok(Batch::new(full, next_row))).await.is_err() {
                    // Consumer went away (cancelled or failed).
                    return Ok(());
                }
                next_row += count;
            }
        }

        if !buffer.is_empty() {
            let _ = tx.send(Ok(Batch::new(buffer, next_row))).await;
        }

        Ok(())
    }
}

#[async_trait]
impl SourceCatalog for SqliteCatalog {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(LIST_TABLES_SQL).fetch_all(&self.pool).await?;
        let tables = rows
            .iter()
            .map(|r| r.try_get::<String, _>("name"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!("Found {} user tables", tables.len());
        Ok(tables)
    }

    async fn load_columns(&self, table: &str) -> Result<Vec<RawColumn>> {
        let rows = sqlx::query(TABLE_INFO_SQL)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(RawColumn {
                ordinal: row.try_get::<i64, _>("cid")? as i32,
                name: row.try_get("name")?,
                data_type: row.try_get::<Option<String>, _>("type")?.unwrap_or_default(),
                not_null: row.try_get::<i64, _>("notnull")? != 0,
                default: row.try_get("dflt_value")?,
                pk_position: row.try_get::<i64, _>("pk")? as i32,
            });
        }

        if columns.is_empty() {
            return Err(MigrateError::Introspection(format!(
                "table {} has no columns or does not exist",
                table
            )));
        }

        Ok(columns)
    }

    async fn load_foreign_keys(&self, table: &str) -> Result<Vec<RawForeignKey>> {
        let rows = sqlx::query(FOREIGN_KEY_LIST_SQL)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut fks = Vec::with_capacity(rows.len());
        for row in rows {
            fks.push(RawForeignKey {
                id: row.try_get("id")?,
                seq: row.try_get("seq")?,
                ref_table: row.try_get("table")?,
                from: row.try_get("from")?,
                to: row.try_get("to")?,
                on_delete: row.try_get("on_delete")?,
            });
        }

        Ok(fks)
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode_row).collect()
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(READ_AHEAD_BATCHES);
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let result = Self::read_table_impl(pool, opts, tx.clone()).await;
            if let Err(e) = result {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
