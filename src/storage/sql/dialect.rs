//! SQL dialect trait for the supported backends
//!
//! This trait defines the interface for generating database-specific SQL
//! text. Bulk loading lives with the backends, since it needs a live
//! connection.

use chrono::{DateTime, Utc};

use crate::storage::schema::{ColumnType, TIME_COLUMN, TableSchema};

/// SQL dialect trait for generating database-specific SQL
///
/// The backends differ in:
/// - Identifier quoting (`"x"` vs `` `x` ``)
/// - Parameter placeholders (`$1` vs `?`)
/// - Type names for timestamps and doubles
/// - Timestamp literal format
/// - Index DDL (`CREATE INDEX IF NOT EXISTS` is not available everywhere)
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Character used to quote identifiers
    fn quote_char(&self) -> char;

    /// Quote an identifier, doubling any embedded quote character
    fn quote(&self, identifier: &str) -> String {
        let q = self.quote_char();
        let escaped = identifier.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Placeholder (1-based) for a timestamp bound as text in
    /// [`Self::format_time`] format
    fn time_placeholder(&self, index: usize) -> String;

    fn timestamp_type(&self) -> &'static str;

    fn double_type(&self) -> &'static str;

    fn bigint_type(&self) -> &'static str {
        "BIGINT"
    }

    fn varchar_type(&self) -> &'static str {
        "VARCHAR(255)"
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Timestamp => self.timestamp_type(),
            ColumnType::Varchar => self.varchar_type(),
            ColumnType::Double => self.double_type(),
            ColumnType::BigInt => self.bigint_type(),
        }
    }

    /// Render a timestamp in the backend's native text format
    fn format_time(&self, time: DateTime<Utc>) -> String;

    /// Column definitions for a `CREATE TABLE` body
    fn column_definitions(&self, schema: &TableSchema) -> Vec<String> {
        schema
            .columns()
            .iter()
            .map(|column| {
                let not_null = if column.name == TIME_COLUMN {
                    " NOT NULL"
                } else {
                    ""
                };
                format!(
                    "{} {}{}",
                    self.quote(&column.name),
                    self.column_type(column.column_type),
                    not_null
                )
            })
            .collect()
    }

    /// Quoted, comma-separated list of identifiers
    fn column_list(&self, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Names of the tables in the connection's current schema, as text
    fn list_tables(&self) -> &'static str;

    /// Idempotent DDL for a table and its time index, in execution order
    fn create_table(&self, schema: &TableSchema) -> Vec<String>;

    /// Delete rows older than the bound timestamp parameter
    fn delete_before(&self, table: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} < {}",
            self.quote(table),
            self.quote(TIME_COLUMN),
            self.time_placeholder(1)
        )
    }
}
