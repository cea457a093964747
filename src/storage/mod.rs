//! Relational persistence for metric snapshots
//!
//! This module turns a [`Snapshot`](crate::Snapshot) into time-stamped rows
//! in PostgreSQL or MySQL.
//!
//! ## Layers
//!
//! - [`identifier`]: strips metric/label names down to `[A-Za-z0-9_]`
//! - [`schema`]: table names, column layouts and rows per snapshot entry
//! - [`sql`]: per-dialect SQL text (quoting, types, DDL, deletes)
//! - [`backend`]: the `StorageBackend` trait, implemented by
//!   [`postgres`] (COPY bulk load), [`mysql`] (multi-row INSERT) and
//!   [`memory`] (tests)
//! - [`persister`]: insert → create schema → retry once, then retention
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use statsink::storage::{self, Backend, Persister, Rotation, SchemaMapper};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = storage::connect(Backend::Postgres, "postgres://localhost/metrics").await?;
//!     let persister = Persister::new(Arc::from(backend), SchemaMapper::new(Rotation::None), 30);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod identifier;
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod persister;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod schema;
pub mod sql;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use persister::{CycleReport, Persister, SweepReport, WriteOutcome};
pub use schema::{Rotation, SchemaMapper, TableKind};
pub use sql::Backend;

/// Connect to the selected backend
///
/// Fails when the database cannot be reached or the backend was compiled out.
pub async fn connect(backend: Backend, dsn: &str) -> StorageResult<Box<dyn StorageBackend>> {
    match backend {
        #[cfg(feature = "postgres")]
        Backend::Postgres => Ok(Box::new(postgres::PostgresBackend::new(dsn).await?)),
        #[cfg(feature = "mysql")]
        Backend::MySql => Ok(Box::new(mysql::MySqlBackend::new(dsn).await?)),
        #[allow(unreachable_patterns)]
        other => {
            let _ = dsn;
            Err(StorageError::InvalidConfig(format!(
                "{other} support was not compiled in"
            )))
        }
    }
}
