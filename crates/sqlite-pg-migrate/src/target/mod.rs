//! PostgreSQL target executor.
//!
//! DDL is rendered from [`DdlStatement`]s into schema-qualified, quoted SQL.
//! Inserts bind every value as text and cast it to the column's mapped type
//! on the server (`$1::text::INTEGER`), so a value the type cannot parse
//! fails that row, and with it the transaction, instead of being coerced on
//! the client. `BYTEA` columns bind raw bytes.

mod tls;

pub use tls::{make_connector, SslMode};

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::ddl::{ColumnDef, DdlStatement, TargetColumn};
use crate::core::identifier::{qualify, quote_ident, quote_list};
use crate::core::schema::OnDeleteAction;
use crate::core::traits::TargetExecutor;
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};
use crate::typemap::TargetType;

/// Connection timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL target executor.
pub struct PgExecutor {
    pool: Pool,
    schema: String,
}

impl PgExecutor {
    /// Connect to the configured database.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match make_connector(SslMode::parse(&config.ssl_mode)?)? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, NoTls, mgr_config)
            }
        };
        let pool = Pool::builder(mgr)
            .max_size(max_conns.max(1))
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL target connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{} (schema {})",
            config.host, config.port, config.database, config.schema
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }
}

/// Render a DDL statement as PostgreSQL SQL in `schema`.
pub fn render_ddl(stmt: &DdlStatement, schema: &str) -> Result<String> {
    let sql = match stmt {
        DdlStatement::CreateTable { table, columns } => {
            let cols = columns
                .iter()
                .map(render_column)
                .collect::<Result<Vec<_>>>()?;
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
                qualify(schema, table)?,
                cols.join(",\n  ")
            )
        }
        DdlStatement::AddPrimaryKey { table, columns } => format!(
            "ALTER TABLE {} ADD PRIMARY KEY ({})",
            qualify(schema, table)?,
            quote_list(columns)?
        ),
        DdlStatement::CreateUniqueIndex {
            name,
            table,
            columns,
        } => format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(name)?,
            qualify(schema, table)?,
            quote_list(columns)?
        ),
        DdlStatement::AddForeignKey {
            table,
            name,
            columns,
            ref_table,
            ref_columns,
            on_delete,
        } => {
            let mut sql = format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                qualify(schema, table)?,
                quote_ident(name)?,
                quote_list(columns)?,
                qualify(schema, ref_table)?,
                quote_list(ref_columns)?
            );
            if *on_delete != OnDeleteAction::NoAction {
                sql.push_str(" ON DELETE ");
                sql.push_str(on_delete.as_sql());
            }
            sql
        }
    };
    Ok(sql)
}

fn render_column(col: &ColumnDef) -> Result<String> {
    let mut sql = format!("{} {}", quote_ident(&col.name)?, col.ty.as_sql());
    if col.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    Ok(sql)
}

/// Placeholder with the server-side cast for a column type.
fn placeholder(idx: usize, ty: TargetType) -> String {
    match ty {
        TargetType::Bytea => format!("${}::bytea", idx),
        TargetType::Text => format!("${}::text", idx),
        other => format!("${}::text::{}", idx, other.as_sql()),
    }
}

/// Build the single-row INSERT used for every row of a batch.
pub fn build_insert(schema: &str, table: &str, columns: &[TargetColumn]) -> Result<String> {
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let placeholders: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| placeholder(i + 1, c.ty))
        .collect();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualify(schema, table)?,
        quote_list(&names)?,
        placeholders.join(", ")
    ))
}

/// Encode one value as a statement parameter for a column type.
fn to_param(value: &SqlValue, ty: TargetType) -> Box<dyn ToSql + Sync + Send> {
    match ty {
        TargetType::Bytea => Box::new(value.to_bytes()),
        _ => Box::new(value.to_text()),
    }
}

#[async_trait]
impl TargetExecutor for PgExecutor {
    async fn ensure_schema(&self) -> Result<()> {
        let client = self.client("creating target schema").await?;
        // CREATE SCHEMA needs database-level CREATE even when the schema exists.
        let row = client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.schemata WHERE schema_name = $1
                )",
                &[&self.schema],
            )
            .await?;
        if row.get(0) {
            debug!("Target schema {} already exists", self.schema);
            return Ok(());
        }

        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)?);
        client.batch_execute(&sql).await?;
        info!("Created target schema {}", self.schema);
        Ok(())
    }

    async fn apply(&self, stmt: &DdlStatement) -> Result<()> {
        let sql = self.render(stmt)?;
        debug!("Executing DDL: {}", sql);
        let client = self.client("executing DDL").await?;
        client.batch_execute(&sql).await?;
        Ok(())
    }

    fn render(&self, stmt: &DdlStatement) -> Result<String> {
        render_ddl(stmt, &self.schema)
    }

    async fn has_primary_key(&self, table: &str) -> Result<bool> {
        let client = self.client("checking primary key").await?;
        let row = client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.table_constraints
                    WHERE constraint_type = 'PRIMARY KEY'
                    AND table_schema = $1
                    AND table_name = $2
                )",
                &[&self.schema, &table],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn constraint_exists(&self, table: &str, name: &str) -> Result<bool> {
        let client = self.client("checking constraint").await?;
        let row = client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.table_constraints
                    WHERE table_schema = $1
                    AND table_name = $2
                    AND constraint_name = $3
                )",
                &[&self.schema, &table, &name],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn insert_batch(
        &self,
        table: &str,
        columns: &[TargetColumn],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = build_insert(&self.schema, table, columns)?;
        let mut client = self.client("inserting batch").await?;

        // Dropping the transaction without commit rolls it back.
        let tx = client.transaction().await?;
        let stmt = tx.prepare(&sql).await?;

        let mut inserted = 0u64;
        for row in rows {
            if row.len() != columns.len() {
                return Err(MigrateError::Config(format!(
                    "row has {} values but {} has {} columns",
                    row.len(),
                    table,
                    columns.len()
                )));
            }
            let params: Vec<Box<dyn ToSql + Sync + Send>> = row
                .iter()
                .zip(columns)
                .map(|(v, c)| to_param(v, c.ty))
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            inserted += tx.execute(&stmt, &refs).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let client = self.client("checking table").await?;
        let row = client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )",
                &[&self.schema, &table],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let client = self.client("counting rows").await?;
        let sql = format!("SELECT COUNT(*) FROM {}", qualify(&self.schema, table)?);
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client("pinging target").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_create_table() {
        let stmt = DdlStatement::CreateTable {
            table: "customers".into(),
            columns: vec![
                ColumnDef {
                    name: "id".into(),
                    ty: TargetType::Integer,
                    not_null: true,
                    default: None,
                },
                ColumnDef {
                    name: "Created At".into(),
                    ty: TargetType::Timestamp,
                    not_null: false,
                    default: Some("CURRENT_TIMESTAMP".into()),
                },
            ],
        };
        assert_eq!(
            render_ddl(&stmt, "public").unwrap(),
            "CREATE TABLE IF NOT EXISTS \"public\".\"customers\" (\n  \
             \"id\" INTEGER NOT NULL,\n  \
             \"Created At\" TIMESTAMP DEFAULT CURRENT_TIMESTAMP\n)"
        );
    }

    #[test]
    fn test_render_primary_key_and_index() {
        let pk = DdlStatement::AddPrimaryKey {
            table: "t".into(),
            columns: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            render_ddl(&pk, "s").unwrap(),
            "ALTER TABLE \"s\".\"t\" ADD PRIMARY KEY (\"a\", \"b\")"
        );

        let idx = DdlStatement::CreateUniqueIndex {
            name: "idx_t_pk".into(),
            table: "t".into(),
            columns: vec!["a".into()],
        };
        assert_eq!(
            render_ddl(&idx, "s").unwrap(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"idx_t_pk\" ON \"s\".\"t\" (\"a\")"
        );
    }

    #[test]
    fn test_render_foreign_key_on_delete() {
        let mut fk = DdlStatement::AddForeignKey {
            table: "orders".into(),
            name: "fk_orders_customer_id_customers_id".into(),
            columns: vec!["customer_id".into()],
            ref_table: "customers".into(),
            ref_columns: vec!["id".into()],
            on_delete: OnDeleteAction::NoAction,
        };
        let plain = render_ddl(&fk, "public").unwrap();
        assert_eq!(
            plain,
            "ALTER TABLE \"public\".\"orders\" ADD CONSTRAINT \
             \"fk_orders_customer_id_customers_id\" FOREIGN KEY (\"customer_id\") \
             REFERENCES \"public\".\"customers\" (\"id\")"
        );

        if let DdlStatement::AddForeignKey { on_delete, .. } = &mut fk {
            *on_delete = OnDeleteAction::SetNull;
        }
        assert!(render_ddl(&fk, "public")
            .unwrap()
            .ends_with("(\"id\") ON DELETE SET NULL"));
    }

    #[test]
    fn test_render_rejects_empty_table_name() {
        let stmt = DdlStatement::AddPrimaryKey {
            table: String::new(),
            columns: vec!["id".into()],
        };
        assert!(render_ddl(&stmt, "public").is_err());
    }

    #[test]
    fn test_build_insert_casts() {
        let cols = vec![
            TargetColumn {
                name: "id".into(),
                ty: TargetType::Integer,
            },
            TargetColumn {
                name: "name".into(),
                ty: TargetType::Text,
            },
            TargetColumn {
                name: "photo".into(),
                ty: TargetType::Bytea,
            },
        ];
        assert_eq!(
            build_insert("public", "users", &cols).unwrap(),
            "INSERT INTO \"public\".\"users\" (\"id\", \"name\", \"photo\") \
             VALUES ($1::text::INTEGER, $2::text, $3::bytea)"
        );
    }
}
