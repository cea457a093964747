//! SQL abstraction layer for the supported backends
//!
//! This module provides the statement builders for PostgreSQL and MySQL
//! and the [`Backend`] selector used by configuration.

mod dialect;
mod mysql_dialect;
mod postgres_dialect;

use serde::{Deserialize, Serialize};

pub use dialect::SqlDialect;
pub use mysql_dialect::MySqlDialect;
pub use postgres_dialect::PostgresDialect;

/// Database backend identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    #[serde(rename = "mysql")]
    #[value(name = "mysql")]
    MySql,
}

impl Backend {
    /// Get the SQL dialect for this backend
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Backend::Postgres => &PostgresDialect,
            Backend::MySql => &MySqlDialect,
        }
    }

    /// Get the backend name
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::MySql => "mysql",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
