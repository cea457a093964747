//! In-memory storage backend (no persistence)
//!
//! Behaves like a relational store for the operations the persister uses:
//! inserts into a table that was never created fail, inserts are
//! all-or-nothing across tables, and table creation is idempotent. It also
//! counts calls and can be told to fail, which makes it the backend of
//! choice for testing the create-and-retry protocol without a database.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on drop
//! - **No SQL**: Dialect-specific statements are never exercised

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{Row, TableData, TableSchema};

/// A stored row with its sample time
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub time: DateTime<Utc>,
    pub values: Row,
}

/// A table held in memory
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub schema: TableSchema,
    pub rows: Vec<StoredRow>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    insert_calls: usize,
    create_calls: usize,
    tables_created: usize,
    failing_inserts: usize,
    schema_failure: Option<String>,
    failing_deletes: HashSet<String>,
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Names of all created tables, sorted
    pub fn table_names(&self) -> Vec<String> {
        self.state().tables.keys().cloned().collect()
    }

    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.state().tables.get(name).cloned()
    }

    /// Number of rows in `name`, 0 if the table does not exist
    pub fn row_count(&self, name: &str) -> usize {
        self.state().tables.get(name).map_or(0, |t| t.rows.len())
    }

    /// Number of `insert_tables` calls, failed ones included
    pub fn insert_calls(&self) -> usize {
        self.state().insert_calls
    }

    /// Number of `create_tables` calls
    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    /// Number of tables that did not exist when `create_tables` ran
    pub fn tables_created(&self) -> usize {
        self.state().tables_created
    }

    /// Make the next `count` inserts fail regardless of schema
    pub fn fail_next_inserts(&self, count: usize) {
        self.state().failing_inserts = count;
    }

    /// Make every `create_tables` call fail with `message`
    pub fn fail_schema_creation(&self, message: impl Into<String>) {
        self.state().schema_failure = Some(message.into());
    }

    /// Make deletes against `table` fail
    pub fn fail_deletes_for(&self, table: impl Into<String>) {
        self.state().failing_deletes.insert(table.into());
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_tables(
        &self,
        tables: &[TableData],
        time: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut state = self.state();
        state.insert_calls += 1;

        if state.failing_inserts > 0 {
            state.failing_inserts -= 1;
            return Err(StorageError::InsertFailed("injected failure".to_string()));
        }

        // Validate everything first so a failure leaves no partial writes.
        if let Some(missing) = tables
            .iter()
            .filter(|t| !t.rows.is_empty())
            .find(|t| !state.tables.contains_key(&t.schema.name))
        {
            return Err(StorageError::InsertFailed(format!(
                "relation {:?} does not exist",
                missing.schema.name
            )));
        }

        for table in tables.iter().filter(|t| !t.rows.is_empty()) {
            if let Some(stored) = state.tables.get_mut(&table.schema.name) {
                stored.rows.extend(table.rows.iter().map(|values| StoredRow {
                    time,
                    values: values.clone(),
                }));
            }
        }

        debug!("in-memory backend: inserted {} tables", tables.len());
        Ok(())
    }

    async fn create_tables(&self, schemas: &[TableSchema]) -> StorageResult<()> {
        let mut state = self.state();
        state.create_calls += 1;

        if let Some(message) = &state.schema_failure {
            return Err(StorageError::SchemaFailed(message.clone()));
        }

        for schema in schemas {
            if !state.tables.contains_key(&schema.name) {
                state.tables.insert(
                    schema.name.clone(),
                    MemoryTable {
                        schema: schema.clone(),
                        rows: Vec::new(),
                    },
                );
                state.tables_created += 1;
            }
        }
        Ok(())
    }

    async fn delete_before(&self, table: &str, before: DateTime<Utc>) -> StorageResult<u64> {
        let mut state = self.state();

        if state.failing_deletes.contains(table) {
            return Err(StorageError::RetentionFailed(format!(
                "{}: injected failure",
                table
            )));
        }

        let stored = state.tables.get_mut(table).ok_or_else(|| {
            StorageError::RetentionFailed(format!("{}: relation does not exist", table))
        })?;

        let before_len = stored.rows.len();
        stored.rows.retain(|row| row.time >= before);
        Ok((before_len - stored.rows.len()) as u64)
    }

    async fn existing_tables(&self) -> StorageResult<Vec<String>> {
        Ok(self.table_names())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("backend".to_string(), "memory".to_string());
        metadata.insert("tables".to_string(), self.state().tables.len().to_string());

        Ok(HealthStatus {
            healthy: true,
            message: "in-memory backend operational".to_string(),
            metadata,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
