//! PostgreSQL storage backend implementation
//!
//! Rows are bulk loaded with `COPY ... FROM STDIN` in CSV format: one copy
//! stream per table, every stream inside the same transaction.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{Row, TableData, TableSchema, Value};
use super::sql::{PostgresDialect, SqlDialect};

/// PostgreSQL storage backend
pub struct PostgresBackend {
    pool: PgPool,
    dialect: PostgresDialect,
}

impl PostgresBackend {
    /// Connect to PostgreSQL
    ///
    /// Fails if the DSN is malformed or no connection can be opened.
    #[instrument(skip_all)]
    pub async fn new(dsn: &str) -> StorageResult<Self> {
        let options = PgConnectOptions::from_str(dsn)
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("PostgreSQL connection pool created");

        Ok(Self {
            pool,
            dialect: PostgresDialect,
        })
    }

    /// Stream one table's rows over a single COPY
    async fn copy_rows(
        &self,
        conn: &mut PgConnection,
        table: &TableData,
        time: &str,
    ) -> Result<u64, sqlx::Error> {
        if table.rows.is_empty() {
            return Ok(0);
        }

        let columns = table.schema.columns();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let statement = self.dialect.copy_statement(&table.schema.name, &names);

        let mut copy = conn.copy_in_raw(&statement).await?;
        copy.send(encode_csv(time, &table.rows)).await?;
        copy.finish().await
    }

    async fn rollback(tx: Transaction<'_, Postgres>) {
        if let Err(e) = tx.rollback().await {
            warn!("rollback failed: {}", e);
        }
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        self.dialect.name()
    }

    #[instrument(skip_all, fields(tables = tables.len()))]
    async fn insert_tables(
        &self,
        tables: &[TableData],
        time: DateTime<Utc>,
    ) -> StorageResult<()> {
        let time = self.dialect.format_time(time);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::InsertFailed(e.to_string()))?;

        for table in tables {
            match self.copy_rows(&mut tx, table, &time).await {
                Ok(copied) => trace!("copied {} rows into {}", copied, table.schema.name),
                Err(e) => {
                    Self::rollback(tx).await;
                    return Err(StorageError::InsertFailed(format!(
                        "{}: {}",
                        table.schema.name, e
                    )));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::InsertFailed(e.to_string()))?;

        debug!("insert transaction committed");
        Ok(())
    }

    #[instrument(skip_all, fields(tables = schemas.len()))]
    async fn create_tables(&self, schemas: &[TableSchema]) -> StorageResult<()> {
        for schema in schemas {
            for statement in self.dialect.create_table(schema) {
                trace!("{}", statement);
                sqlx::query(&statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::SchemaFailed(format!("{}: {}", schema.name, e)))?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_before(&self, table: &str, before: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query(&self.dialect.delete_before(table))
            .bind(self.dialect.format_time(before))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::RetentionFailed(format!("{}: {}", table, e)))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn existing_tables(&self) -> StorageResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(self.dialect.list_tables())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("listing tables: {}", e)))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), self.name().to_string());
                metadata.insert("pool_size".to_string(), self.pool.size().to_string());

                Ok(HealthStatus {
                    healthy: true,
                    message: "PostgreSQL backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing PostgreSQL backend");
        self.pool.close().await;
        Ok(())
    }
}

/// Encode rows as `COPY ... WITH (FORMAT csv)` input, `time` first.
///
/// Text is always quoted so an empty label stays an empty string rather
/// than NULL.
fn encode_csv(time: &str, rows: &[Row]) -> Vec<u8> {
    let mut out = String::with_capacity(rows.len() * 48);
    for row in rows {
        out.push_str(time);
        for value in row {
            out.push(',');
            match value {
                Value::Text(text) => {
                    out.push('"');
                    out.push_str(&text.replace('"', "\"\""));
                    out.push('"');
                }
                Value::Double(d) if d.is_nan() => out.push_str("NaN"),
                Value::Double(d) if d.is_infinite() => {
                    out.push_str(if *d > 0.0 { "Infinity" } else { "-Infinity" })
                }
                Value::Double(d) => {
                    let _ = write!(out, "{}", d);
                }
                Value::BigInt(i) => {
                    let _ = write!(out, "{}", i);
                }
            }
        }
        out.push('\n');
    }
    out.into_bytes()
}
