//! MySQL SQL dialect implementation

use chrono::{DateTime, Utc};

use super::SqlDialect;
use crate::storage::schema::TableSchema;

/// MySQL SQL dialect
pub struct MySqlDialect;

impl MySqlDialect {
    /// `INSERT INTO t (..) ` prefix, to be followed by a `VALUES` list
    pub fn insert_prefix(&self, table: &str, columns: &[&str]) -> String {
        format!(
            "INSERT INTO {} ({}) ",
            self.quote(table),
            self.column_list(columns)
        )
    }
}

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn time_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn timestamp_type(&self) -> &'static str {
        "DATETIME"
    }

    fn double_type(&self) -> &'static str {
        "DOUBLE"
    }

    fn format_time(&self, time: DateTime<Utc>) -> String {
        time.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    // MySQL has no CREATE INDEX IF NOT EXISTS, so the index is declared inline.
    fn list_tables(&self) -> &'static str {
        "SELECT CAST(table_name AS CHAR) FROM information_schema.tables WHERE table_schema = DATABASE()"
    }

    fn create_table(&self, schema: &TableSchema) -> Vec<String> {
        let mut definitions = self.column_definitions(schema);
        definitions.push(format!(
            "INDEX {} ({})",
            self.quote(&schema.index_name()),
            self.column_list(&schema.index_columns())
        ));
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote(&schema.name),
            definitions.join(", ")
        )]
    }
}
