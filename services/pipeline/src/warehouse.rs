//! Warehouse access: typed rows, explicit schemas, and the statements the
//! loader needs (period deletes and merges)
//!
//! `PgWarehouse` is the PostgreSQL implementation. Loads run inside one
//! transaction so a table either receives the whole batch or nothing.

use chrono::{NaiveDate, NaiveDateTime};
pub use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::future::Future;
use thiserror::Error;

use crate::partition::Period;

/// Postgres caps a statement at 65535 bind parameters.
const BIND_LIMIT: usize = 65_535;

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Row {row} has {got} values, schema of {table} has {expected} columns")]
    RowWidth {
        table: String,
        row: usize,
        got: usize,
        expected: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Date,
    DateTime,
    Float,
    Text,
}

impl FieldKind {
    fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Date => "DATE",
            FieldKind::DateTime => "TIMESTAMP",
            FieldKind::Float => "DOUBLE PRECISION",
            FieldKind::Text => "TEXT",
        }
    }
}

/// One column of an explicit load schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// A nullable cell, typed so NULLs bind with the right column type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Date(Option<NaiveDate>),
    DateTime(Option<NaiveDateTime>),
    Float(Option<f64>),
    Text(Option<String>),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Date(_) => FieldKind::Date,
            Value::DateTime(_) => FieldKind::DateTime,
            Value::Float(_) => FieldKind::Float,
            Value::Text(_) => FieldKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    /// Replace the table contents with the loaded rows.
    Truncate,
}

/// Statements the pipeline runs against the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Delete every row whose date column falls in one of `periods`.
    DeletePeriods {
        table: String,
        date_column: &'static str,
        periods: Vec<Period>,
    },
    /// Upsert `source` into `target` on `keys`, updating `updates`.
    Merge {
        target: String,
        source: String,
        keys: &'static [&'static str],
        updates: &'static [&'static str],
        columns: &'static [&'static str],
    },
}

impl Statement {
    pub fn to_sql(&self) -> String {
        match self {
            Statement::DeletePeriods {
                table,
                date_column,
                periods,
            } => {
                let predicate = if periods.is_empty() {
                    "FALSE".to_string()
                } else {
                    periods
                        .iter()
                        .map(|p| {
                            format!(
                                "(EXTRACT(YEAR FROM {col}) = {} AND EXTRACT(MONTH FROM {col}) = {})",
                                p.year,
                                p.month,
                                col = date_column
                            )
                        })
                        .collect::<Vec<_>>()
                        .join(" OR ")
                };
                format!("DELETE FROM {} WHERE {}", table, predicate)
            }
            Statement::Merge {
                target,
                source,
                keys,
                updates,
                columns,
            } => {
                let on = keys
                    .iter()
                    .map(|k| format!("target.{k} = source.{k}"))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let set = updates
                    .iter()
                    .map(|c| format!("{c} = source.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let values = columns
                    .iter()
                    .map(|c| format!("source.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    r#"MERGE INTO {target} AS target
USING {source} AS source
ON {on}
WHEN MATCHED THEN
    UPDATE SET {set}
WHEN NOT MATCHED THEN
    INSERT ({cols})
    VALUES ({values})"#,
                    cols = columns.join(", ")
                )
            }
        }
    }
}

/// The three operation shapes the pipeline consumes.
pub trait Warehouse: Send + Sync {
    /// Bulk-load `rows` into `table`, creating it from `schema` if missing.
    /// Returns the number of rows written.
    fn load(
        &self,
        table: &str,
        schema: &[Field],
        rows: &[Vec<Value>],
        mode: WriteMode,
    ) -> impl Future<Output = Result<u64, WarehouseError>> + Send;

    /// Run a statement to completion, returning the affected row count.
    fn execute(
        &self,
        statement: &Statement,
    ) -> impl Future<Output = Result<u64, WarehouseError>> + Send;

    /// Create `table` from `schema` unless it already exists.
    fn ensure_table(
        &self,
        table: &str,
        schema: &[Field],
    ) -> impl Future<Output = Result<(), WarehouseError>> + Send;

    /// Drop `table`; a missing table is not an error.
    fn drop_table(&self, table: &str) -> impl Future<Output = Result<(), WarehouseError>> + Send;
}

fn check_widths(table: &str, schema: &[Field], rows: &[Vec<Value>]) -> Result<(), WarehouseError> {
    match rows.iter().position(|r| r.len() != schema.len()) {
        Some(row) => Err(WarehouseError::RowWidth {
            table: table.to_string(),
            row,
            got: rows[row].len(),
            expected: schema.len(),
        }),
        None => Ok(()),
    }
}

pub fn create_table_sql(table: &str, schema: &[Field]) -> String {
    let columns = schema
        .iter()
        .map(|f| format!("{} {}", f.name, f.kind.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({})", table, columns)
}

/// `CREATE SCHEMA` for a qualified name, then `CREATE TABLE`, both idempotent.
async fn create_if_missing(
    conn: &mut PgConnection,
    table: &str,
    schema: &[Field],
) -> Result<(), WarehouseError> {
    if let Some((schema_name, _)) = table.split_once('.') {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema_name))
            .execute(&mut *conn)
            .await?;
    }
    sqlx::query(&create_table_sql(table, schema))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str) -> Result<Self, WarehouseError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }
}

impl Warehouse for PgWarehouse {
    async fn load(
        &self,
        table: &str,
        schema: &[Field],
        rows: &[Vec<Value>],
        mode: WriteMode,
    ) -> Result<u64, WarehouseError> {
        check_widths(table, schema, rows)?;

        let mut tx = self.pool.begin().await?;

        create_if_missing(&mut tx, table, schema).await?;
        if mode == WriteMode::Truncate {
            sqlx::query(&format!("TRUNCATE TABLE {}", table))
                .execute(&mut *tx)
                .await?;
        }

        let columns = schema.iter().map(|f| f.name).collect::<Vec<_>>().join(", ");
        let chunk_size = (BIND_LIMIT / schema.len().max(1)).max(1);
        let mut written = 0u64;

        for chunk in rows.chunks(chunk_size) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, columns));
            qb.push_values(chunk, |mut b, row| {
                for value in row {
                    match value {
                        Value::Date(v) => b.push_bind(*v),
                        Value::DateTime(v) => b.push_bind(*v),
                        Value::Float(v) => b.push_bind(*v),
                        Value::Text(v) => b.push_bind(v.clone()),
                    };
                }
            });
            written += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, WarehouseError> {
        let sql = statement.to_sql();
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn ensure_table(&self, table: &str, schema: &[Field]) -> Result<(), WarehouseError> {
        let mut conn = self.pool.acquire().await?;
        create_if_missing(&mut conn, table, schema).await
    }

    async fn drop_table(&self, table: &str) -> Result<(), WarehouseError> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
