//! Table layout derived from a snapshot
//!
//! Every snapshot entry (`metric|label`) maps to up to four tables:
//!
//! | Kind      | Name                       | Columns                          |
//! |-----------|----------------------------|----------------------------------|
//! | counts    | `{metric}_count_by_{label}`| time, `{label}`, count           |
//! | summary   | `{metric}_by_{label}`      | time, `{label}`, duration, count |
//! | histogram | `{metric}_histogram`       | time, duration, count            |
//! | totals    | `{metric}_totals`          | time, duration, count            |
//!
//! Sets without durations are plain counters and only get the counts table.
//! Sets with durations get summary, histogram and totals; the last two are
//! shared by every label of a metric and filled once. Table names carry
//! an optional rotation suffix (`_in_2024_05`, `_in_2024_05_17`).

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::error::StorageError;
use super::identifier::{is_usable, sanitize};
use crate::{Bucket, KEY_SEPARATOR, Snapshot, StatisticSet};

/// Column holding the sample timestamp
pub const TIME_COLUMN: &str = "time";

/// Column holding the accumulated duration (seconds)
pub const DURATION_COLUMN: &str = "duration";

/// Column holding the observed count
pub const COUNT_COLUMN: &str = "count";

const RESERVED_COLUMNS: [&str; 3] = [TIME_COLUMN, DURATION_COLUMN, COUNT_COLUMN];

/// Longest label value stored; matches the `VARCHAR(255)` label column
pub const MAX_LABEL_VALUE_CHARS: usize = 255;

/// Calendar period used to rotate tables
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    /// One set of tables forever
    #[default]
    None,

    /// New tables every calendar month (`_in_YYYY_MM`)
    Monthly,

    /// New tables every calendar day (`_in_YYYY_MM_DD`)
    Daily,
}

impl Rotation {
    fn format(&self) -> Option<&'static str> {
        match self {
            Rotation::None => None,
            Rotation::Monthly => Some("_in_%Y_%m"),
            Rotation::Daily => Some("_in_%Y_%m_%d"),
        }
    }

    /// Table name suffix for the period containing `now`
    pub fn suffix(&self, now: DateTime<Utc>) -> String {
        self.format()
            .map(|format| now.format(format).to_string())
            .unwrap_or_default()
    }

    /// Suffixes of every period from the one before `from` up to the one
    /// containing `to`, oldest first
    ///
    /// The extra leading period holds rows written just before `from`
    /// crossed into its current period.
    pub fn suffixes_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<String> {
        let Some(format) = self.format() else {
            return vec![String::new()];
        };

        let first = self.period_start(from.date_naive());
        let last = self.period_start(to.date_naive());
        let mut period = self.previous(first).unwrap_or(first);
        let mut suffixes = Vec::new();
        while period <= last {
            suffixes.push(period.format(format).to_string());
            match self.next(period) {
                Some(next) => period = next,
                None => break,
            }
        }
        suffixes
    }

    fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Rotation::Monthly => date.with_day(1).unwrap_or(date),
            Rotation::None | Rotation::Daily => date,
        }
    }

    fn previous(&self, period: NaiveDate) -> Option<NaiveDate> {
        match self {
            Rotation::None => None,
            Rotation::Monthly => period.checked_sub_months(Months::new(1)),
            Rotation::Daily => period.pred_opt(),
        }
    }

    fn next(&self, period: NaiveDate) -> Option<NaiveDate> {
        match self {
            Rotation::None => None,
            Rotation::Monthly => period.checked_add_months(Months::new(1)),
            Rotation::Daily => period.succ_opt(),
        }
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rotation::None => write!(f, "none"),
            Rotation::Monthly => write!(f, "monthly"),
            Rotation::Daily => write!(f, "daily"),
        }
    }
}

/// The four kinds of table a snapshot entry can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Counts,
    Summary,
    Histogram,
    Totals,
}

impl TableKind {
    fn table_name(&self, metric: &str, label: &str) -> String {
        match self {
            TableKind::Counts => format!("{metric}_count_by_{label}"),
            TableKind::Summary => format!("{metric}_by_{label}"),
            TableKind::Histogram => format!("{metric}_histogram"),
            TableKind::Totals => format!("{metric}_totals"),
        }
    }

    fn has_label(&self) -> bool {
        matches!(self, TableKind::Counts | TableKind::Summary)
    }

    fn has_duration(&self) -> bool {
        !matches!(self, TableKind::Counts)
    }

    /// Named by metric alone, shared by all of its labels
    fn is_per_metric(&self) -> bool {
        matches!(self, TableKind::Histogram | TableKind::Totals)
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableKind::Counts => write!(f, "counts"),
            TableKind::Summary => write!(f, "summary"),
            TableKind::Histogram => write!(f, "histogram"),
            TableKind::Totals => write!(f, "totals"),
        }
    }
}

/// Logical column type, spelled per dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Timestamp,
    Varchar,
    Double,
    BigInt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Name and layout of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Sanitized table name, rotation suffix included
    pub name: String,

    pub kind: TableKind,

    /// Sanitized label column for counts and summary tables
    pub label_column: Option<String>,
}

impl TableSchema {
    /// All columns in DDL order, `time` first
    pub fn columns(&self) -> Vec<Column> {
        let mut columns = vec![Column::new(TIME_COLUMN, ColumnType::Timestamp)];
        columns.extend(self.value_columns());
        columns
    }

    /// Columns filled from a [`Row`], in row order (everything but `time`)
    pub fn value_columns(&self) -> Vec<Column> {
        let mut columns = Vec::with_capacity(3);
        if let Some(label) = &self.label_column {
            columns.push(Column::new(label.clone(), ColumnType::Varchar));
        }
        if self.kind.has_duration() {
            columns.push(Column::new(DURATION_COLUMN, ColumnType::Double));
        }
        columns.push(Column::new(COUNT_COLUMN, ColumnType::BigInt));
        columns
    }

    /// Columns covered by the secondary index
    pub fn index_columns(&self) -> Vec<&str> {
        let mut columns = vec![TIME_COLUMN];
        if let Some(label) = &self.label_column {
            columns.push(label.as_str());
        }
        columns
    }

    pub fn index_name(&self) -> String {
        format!("{}_time_idx", self.name)
    }
}

/// A single bound value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Double(f64),
    BigInt(i64),
}

/// Values for [`TableSchema::value_columns`], in order
pub type Row = Vec<Value>;

/// Rows destined for one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub schema: TableSchema,
    pub rows: Vec<Row>,
}

/// A snapshot entry that could not be mapped to tables
#[derive(Debug)]
pub struct SkippedEntry {
    pub key: String,
    pub reason: StorageError,
}

/// Result of mapping a snapshot
#[derive(Debug, Default)]
pub struct MappedSnapshot {
    pub tables: Vec<TableData>,
    pub skipped: Vec<SkippedEntry>,
}

impl MappedSnapshot {
    /// Distinct table schemas, in mapping order
    pub fn schemas(&self) -> Vec<TableSchema> {
        let mut seen = HashSet::new();
        let mut schemas = Vec::new();
        for table in &self.tables {
            if seen.insert(table.schema.name.as_str()) {
                schemas.push(table.schema.clone());
            }
        }
        schemas
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// Derives table layouts and rows from snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaMapper {
    rotation: Rotation,
}

impl SchemaMapper {
    pub fn new(rotation: Rotation) -> Self {
        Self { rotation }
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Map every entry of `snapshot`. Entries with unusable names are
    /// reported in [`MappedSnapshot::skipped`] instead of failing the rest.
    ///
    /// Histogram and totals tables are per metric: when a metric is tracked
    /// under several labels, only its first timed entry (in key order)
    /// fills them.
    pub fn map(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> MappedSnapshot {
        let suffix = self.rotation.suffix(now);
        let mut mapped = MappedSnapshot::default();
        let mut per_metric = HashSet::new();

        for (metric, label, set) in snapshot.entries() {
            match map_entry(metric, label, set, &snapshot.buckets, &suffix) {
                Ok(tables) => {
                    for table in tables {
                        if table.schema.kind.is_per_metric()
                            && !per_metric.insert(table.schema.name.clone())
                        {
                            trace!(
                                "{} already mapped, ignoring label {:?}",
                                table.schema.name, label
                            );
                            continue;
                        }
                        mapped.tables.push(table);
                    }
                }
                Err(reason) => mapped.skipped.push(SkippedEntry {
                    key: format!("{metric}{KEY_SEPARATOR}{label}"),
                    reason,
                }),
            }
        }

        trace!(
            "mapped {} tables ({} skipped entries)",
            mapped.tables.len(),
            mapped.skipped.len()
        );
        mapped
    }
}

fn map_entry(
    metric: &str,
    label: &str,
    set: &StatisticSet,
    buckets: &[Bucket],
    suffix: &str,
) -> Result<Vec<TableData>, StorageError> {
    let metric_name = sanitize(metric);
    if !is_usable(&metric_name) {
        return Err(StorageError::InvalidIdentifier(format!(
            "metric name {metric:?} is empty after sanitization"
        )));
    }

    let label_name = sanitize(label);
    if !is_usable(&label_name) {
        return Err(StorageError::InvalidIdentifier(format!(
            "label name {label:?} is empty after sanitization"
        )));
    }
    if RESERVED_COLUMNS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(&label_name))
    {
        return Err(StorageError::InvalidIdentifier(format!(
            "label name {label:?} collides with a fixed column"
        )));
    }

    let schema = |kind: TableKind| TableSchema {
        name: format!("{}{suffix}", kind.table_name(&metric_name, &label_name)),
        kind,
        label_column: kind.has_label().then(|| label_name.clone()),
    };

    if !set.has_durations() {
        if set.counters.is_empty() {
            return Ok(Vec::new());
        }
        let rows = set
            .counters
            .iter()
            .map(|(value, count)| vec![label_value(value), Value::BigInt(to_bigint(*count))])
            .collect();
        return Ok(vec![TableData {
            schema: schema(TableKind::Counts),
            rows,
        }]);
    }

    let summary = set
        .counters
        .iter()
        .map(|(value, count)| {
            let duration = set.durations.get(value).copied().unwrap_or(0.0);
            vec![
                label_value(value),
                Value::Double(duration),
                Value::BigInt(to_bigint(*count)),
            ]
        })
        .collect();

    let histogram = buckets
        .iter()
        .map(|bucket| {
            let count = set.buckets.get(&bucket.name).copied().unwrap_or(0);
            vec![Value::Double(bucket.value), Value::BigInt(to_bigint(count))]
        })
        .collect();

    let totals = vec![vec![
        Value::Double(set.total_duration()),
        Value::BigInt(to_bigint(set.total_count())),
    ]];

    Ok(vec![
        TableData {
            schema: schema(TableKind::Summary),
            rows: summary,
        },
        TableData {
            schema: schema(TableKind::Histogram),
            rows: histogram,
        },
        TableData {
            schema: schema(TableKind::Totals),
            rows: totals,
        },
    ])
}

fn label_value(value: &str) -> Value {
    match value.char_indices().nth(MAX_LABEL_VALUE_CHARS) {
        Some((end, _)) => {
            let head: String = value.chars().take(32).collect();
            warn!(
                "label value {:?}... truncated to {} characters",
                head, MAX_LABEL_VALUE_CHARS
            );
            Value::Text(value[..end].to_string())
        }
        None => Value::Text(value.to_string()),
    }
}

/// Counts are unsigned on the wire; BIGINT is signed.
fn to_bigint(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
