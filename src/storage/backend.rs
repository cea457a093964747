//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that the
//! PostgreSQL, MySQL and in-memory backends implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{TableData, TableSchema};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for relational storage backends
///
/// Backends know how to talk to one database; the create-and-retry
/// protocol and the retention policy live in
/// [`Persister`](super::persister::Persister).
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. Implementations map driver errors
/// to the variant naming the phase that failed (`InsertFailed`,
/// `SchemaFailed`, `RetentionFailed`, `QueryFailed`).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Insert the rows of every table inside a single transaction
    ///
    /// All tables are assumed to exist. On any failure the transaction is
    /// rolled back and nothing from this call is visible. Tables without
    /// rows are skipped.
    async fn insert_tables(&self, tables: &[TableData], time: DateTime<Utc>)
    -> StorageResult<()>;

    /// Create the tables and their time indexes if they do not exist
    async fn create_tables(&self, schemas: &[TableSchema]) -> StorageResult<()>;

    /// Delete rows of `table` with `time < before`
    ///
    /// Returns the number of rows deleted.
    async fn delete_before(&self, table: &str, before: DateTime<Utc>) -> StorageResult<u64>;

    /// Names of the tables that currently exist
    async fn existing_tables(&self) -> StorageResult<Vec<String>>;

    /// Check backend health
    ///
    /// Performs a lightweight round-trip to verify the database is reachable.
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
