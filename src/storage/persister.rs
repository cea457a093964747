//! Persistence engine: snapshot → tables, with schema on demand and retention
//!
//! ## Write protocol
//!
//! ```text
//! Inserting ──ok──────────────────────────────────────► Done
//!     │
//!     └─err─► CreatingSchema ──ok──► RetryingInsert ──ok──► Done
//!                   │                      │
//!                   └─err──► Failed ◄──err─┘
//! ```
//!
//! Every insert error is treated as "schema missing". The backends cannot
//! tell a missing table apart from other SQL errors, so any failure costs
//! one (possibly useless) round of `CREATE TABLE IF NOT EXISTS`; the
//! original cause is logged before schema creation starts.
//!
//! ## Retention
//!
//! After the write, whatever its outcome, rows older than the retention
//! window are deleted from every table the snapshot maps to. Each table is
//! its own statement; a failing table is logged and the sweep moves on.
//! With rotation enabled, tables of earlier periods that can still hold
//! expired rows are included.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, trace, warn};

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use super::schema::{MappedSnapshot, Rotation, SchemaMapper, TableSchema};
use crate::Snapshot;

/// How a snapshot write completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// All tables already existed
    Inserted,

    /// The first insert failed; tables were created and the retry succeeded
    InsertedAfterSchemaCreation,

    /// The snapshot mapped to no rows
    NothingToWrite,
}

#[derive(Debug)]
enum WriteState {
    Inserting,
    CreatingSchema { cause: StorageError },
    RetryingInsert,
    Done(WriteOutcome),
    Failed(StorageError),
}

/// Result of one retention sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tables swept successfully
    pub tables: usize,

    /// Rows deleted across those tables
    pub rows_deleted: u64,
}

/// Result of one persistence pass
#[derive(Debug)]
pub struct CycleReport {
    /// Snapshot entries rejected by the mapper
    pub skipped: usize,

    pub write: StorageResult<WriteOutcome>,

    pub sweep: StorageResult<SweepReport>,
}

impl CycleReport {
    pub fn is_ok(&self) -> bool {
        self.write.is_ok() && self.sweep.is_ok()
    }
}

/// Writes snapshots through a [`StorageBackend`]
pub struct Persister {
    backend: Arc<dyn StorageBackend>,
    mapper: SchemaMapper,
    retention_days: u32,
}

impl Persister {
    pub fn new(backend: Arc<dyn StorageBackend>, mapper: SchemaMapper, retention_days: u32) -> Self {
        debug!(
            "persister using {} backend, rotation {}, retention {} days",
            backend.name(),
            mapper.rotation(),
            retention_days
        );

        Self {
            backend,
            mapper,
            retention_days,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Map a snapshot the way [`Self::persist`] does
    pub fn map(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> MappedSnapshot {
        self.mapper.map(snapshot, now)
    }

    /// Write `snapshot` stamped with `now`, then sweep expired rows
    #[instrument(skip_all, fields(entries = snapshot.names.len()))]
    pub async fn persist(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> CycleReport {
        let mapped = self.map(snapshot, now);

        for skipped in &mapped.skipped {
            warn!("skipping {:?}: {}", skipped.key, skipped.reason);
        }

        let write = self.write(&mapped, now).await;
        match &write {
            Ok(outcome) => info!(
                "wrote {} rows to {} tables ({:?})",
                mapped.row_count(),
                mapped.tables.len(),
                outcome
            ),
            Err(e) => error!("snapshot write abandoned: {}", e),
        }

        let sweep = self.sweep(&mapped.schemas(), now).await;
        match &sweep {
            Ok(report) => debug!(
                "retention sweep deleted {} rows from {} tables",
                report.rows_deleted, report.tables
            ),
            Err(e) => error!("{}", e),
        }

        CycleReport {
            skipped: mapped.skipped.len(),
            write,
            sweep,
        }
    }

    /// Insert, creating the schema and retrying once on failure
    pub async fn write(
        &self,
        mapped: &MappedSnapshot,
        now: DateTime<Utc>,
    ) -> StorageResult<WriteOutcome> {
        if mapped.row_count() == 0 {
            return Ok(WriteOutcome::NothingToWrite);
        }

        let mut state = WriteState::Inserting;
        loop {
            state = match state {
                WriteState::Inserting => match self.backend.insert_tables(&mapped.tables, now).await {
                    Ok(()) => WriteState::Done(WriteOutcome::Inserted),
                    Err(cause) => WriteState::CreatingSchema { cause },
                },
                WriteState::CreatingSchema { cause } => {
                    warn!("insert failed, creating schema before retrying: {}", cause);
                    match self.backend.create_tables(&mapped.schemas()).await {
                        Ok(()) => WriteState::RetryingInsert,
                        Err(e) => WriteState::Failed(e),
                    }
                }
                WriteState::RetryingInsert => {
                    match self.backend.insert_tables(&mapped.tables, now).await {
                        Ok(()) => WriteState::Done(WriteOutcome::InsertedAfterSchemaCreation),
                        Err(e) => WriteState::Failed(e),
                    }
                }
                WriteState::Done(outcome) => return Ok(outcome),
                WriteState::Failed(e) => return Err(e),
            };
        }
    }

    /// Delete rows older than `now - retention_days` from `schemas`
    ///
    /// With rotation, the same tables of earlier periods that still hold
    /// rows inside or just before the window are swept too, if they exist.
    pub async fn sweep(
        &self,
        schemas: &[TableSchema],
        now: DateTime<Utc>,
    ) -> StorageResult<SweepReport> {
        let cutoff = now - Duration::days(i64::from(self.retention_days));
        let mut report = SweepReport::default();
        let mut failed = Vec::new();

        let mut tables: Vec<String> = schemas.iter().map(|s| s.name.clone()).collect();
        match self.earlier_periods(schemas, cutoff, now).await {
            Ok(earlier) => tables.extend(earlier),
            Err(e) => {
                warn!("{}", e);
                failed.push("earlier periods".to_string());
            }
        }

        for table in &tables {
            match self.backend.delete_before(table, cutoff).await {
                Ok(deleted) => {
                    report.tables += 1;
                    report.rows_deleted += deleted;
                }
                Err(e) => {
                    warn!("{}", e);
                    failed.push(table.clone());
                }
            }
        }

        if failed.is_empty() {
            Ok(report)
        } else {
            Err(StorageError::RetentionFailed(format!(
                "{} of {} tables failed: {}",
                failed.len(),
                tables.len(),
                failed.join(", ")
            )))
        }
    }

    /// Existing tables of earlier rotation periods matching `schemas`
    async fn earlier_periods(
        &self,
        schemas: &[TableSchema],
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<String>> {
        let rotation = self.mapper.rotation();
        if rotation == Rotation::None || schemas.is_empty() {
            return Ok(Vec::new());
        }

        let current = rotation.suffix(now);
        let suffixes: Vec<String> = rotation
            .suffixes_between(cutoff, now)
            .into_iter()
            .filter(|suffix| *suffix != current)
            .collect();
        if suffixes.is_empty() {
            return Ok(Vec::new());
        }

        let existing: HashSet<String> =
            self.backend.existing_tables().await?.into_iter().collect();
        let mut tables = Vec::new();
        for base in schemas.iter().filter_map(|s| s.name.strip_suffix(current.as_str())) {
            for suffix in &suffixes {
                let name = format!("{base}{suffix}");
                if existing.contains(&name) && !tables.contains(&name) {
                    trace!("sweeping earlier period table {}", name);
                    tables.push(name);
                }
            }
        }
        Ok(tables)
    }
}
