//! PostgreSQL SQL dialect implementation

use chrono::{DateTime, SecondsFormat, Utc};

use super::SqlDialect;
use crate::storage::schema::TableSchema;

/// PostgreSQL SQL dialect
pub struct PostgresDialect;

impl PostgresDialect {
    /// `COPY ... FROM STDIN` statement for CSV-encoded rows
    pub fn copy_statement(&self, table: &str, columns: &[&str]) -> String {
        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
            self.quote(table),
            self.column_list(columns)
        )
    }
}

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn time_placeholder(&self, index: usize) -> String {
        format!("${}::timestamptz", index)
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMPTZ"
    }

    fn double_type(&self) -> &'static str {
        "DOUBLE PRECISION"
    }

    fn format_time(&self, time: DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn list_tables(&self) -> &'static str {
        "SELECT table_name::text FROM information_schema.tables WHERE table_schema = current_schema()"
    }

    fn create_table(&self, schema: &TableSchema) -> Vec<String> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote(&schema.name),
            self.column_definitions(schema).join(", ")
        );
        let index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.quote(&schema.index_name()),
            self.quote(&schema.name),
            self.column_list(&schema.index_columns())
        );
        vec![create, index]
    }
}
