//! MySQL storage backend implementation
//!
//! Rows are written with parameterized multi-row `INSERT ... VALUES`
//! statements. Every value is bound, never interpolated into SQL text.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlPoolOptions};
use sqlx::{MySql, MySqlPool, QueryBuilder, Transaction};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{TableData, TableSchema, Value};
use super::sql::{MySqlDialect, SqlDialect};

/// Upper bound on placeholders in one prepared statement
const MAX_PLACEHOLDERS: usize = 65_535;

/// MySQL storage backend
pub struct MySqlBackend {
    pool: MySqlPool,
    dialect: MySqlDialect,
}

impl MySqlBackend {
    /// Connect to MySQL
    ///
    /// Fails if the DSN is malformed or no connection can be opened.
    #[instrument(skip_all)]
    pub async fn new(dsn: &str) -> StorageResult<Self> {
        let options = MySqlConnectOptions::from_str(dsn)
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("MySQL connection pool created");

        Ok(Self {
            pool,
            dialect: MySqlDialect,
        })
    }

    /// Insert one table's rows with as few multi-row statements as the
    /// placeholder limit allows
    async fn insert_rows(
        &self,
        conn: &mut MySqlConnection,
        table: &TableData,
        time: &str,
    ) -> Result<u64, sqlx::Error> {
        if table.rows.is_empty() {
            return Ok(0);
        }

        let columns = table.schema.columns();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let prefix = self.dialect.insert_prefix(&table.schema.name, &names);

        let mut inserted = 0;
        for chunk in table.rows.chunks(rows_per_statement(names.len())) {
            let mut builder: QueryBuilder<MySql> = QueryBuilder::new(&prefix);
            builder.push_values(chunk, |mut row_builder, row| {
                row_builder.push_bind(time.to_string());
                for value in row {
                    match value {
                        Value::Text(text) => row_builder.push_bind(text.clone()),
                        // DOUBLE cannot hold infinities or NaN
                        Value::Double(d) => row_builder.push_bind(d.is_finite().then_some(*d)),
                        Value::BigInt(i) => row_builder.push_bind(*i),
                    };
                }
            });
            inserted += builder.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn rollback(tx: Transaction<'_, MySql>) {
        if let Err(e) = tx.rollback().await {
            warn!("rollback failed: {}", e);
        }
    }
}

fn rows_per_statement(columns: usize) -> usize {
    (MAX_PLACEHOLDERS / columns.max(1)).max(1)
}

#[async_trait]
impl StorageBackend for MySqlBackend {
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
            match self.insert_rows(&mut tx, table, &time).await {
                Ok(inserted) => trace!("inserted {} rows into {}", inserted, table.schema.name),
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
                    message: "MySQL backend operational".to_string(),
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
        info!("closing MySQL backend");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_statement_respects_placeholder_limit() {
        assert_eq!(rows_per_statement(4), 16_383);
        assert_eq!(rows_per_statement(3), 21_845);
        assert!(rows_per_statement(4) * 4 <= MAX_PLACEHOLDERS);
    }

    #[test]
    fn test_rows_per_statement_never_zero() {
        assert_eq!(rows_per_statement(0), MAX_PLACEHOLDERS);
        assert_eq!(rows_per_statement(100_000), 1);
    }
}
