//! Immutable columnar partitions
//!
//! A partition holds every event of one kind for one calendar day, stored
//! column-wise with rows sorted ascending by timestamp. Derived temporal
//! columns (`day`, `week`, `hour`, `minute`) are materialized once at build
//! time so scans never re-derive them.

use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::query::Filter;
use crate::store::StoreError;
use crate::types::{
    event_day, event_hour, event_minute, event_week, EventKind, EventRecord, Value,
};

/// Identity of a partition: one event kind on one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    /// Event kind stored in the partition
    pub kind: EventKind,
    /// Calendar day (UTC) the partition covers
    pub day: NaiveDate,
}

impl PartitionKey {
    /// Create a key from its two dimensions
    pub fn new(kind: EventKind, day: NaiveDate) -> Self {
        Self { kind, day }
    }
}

// Canonical partition order: day ascending, then kind lexicographic.
impl Ord for PartitionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.day
            .cmp(&other.day)
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for PartitionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Lightweight partition metadata, enough for pruning decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMeta {
    /// Partition identity
    pub key: PartitionKey,
    /// Number of rows in the partition
    pub row_count: usize,
    /// Smallest timestamp in the partition (epoch millis)
    pub ts_min: i64,
    /// Largest timestamp in the partition (epoch millis)
    pub ts_max: i64,
}

/// Projected scan output: a set of named columns of equal length
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBatch {
    names: Vec<String>,
    columns: Vec<Vec<Value>>,
}

impl ColumnBatch {
    /// Build a batch from parallel name and column vectors
    pub fn new(names: Vec<String>, columns: Vec<Vec<Value>>) -> Self {
        debug_assert_eq!(names.len(), columns.len());
        Self { names, columns }
    }

    /// Empty batch carrying only the header
    pub fn empty(names: Vec<String>) -> Self {
        let columns = names.iter().map(|_| Vec::new()).collect();
        Self { names, columns }
    }

    /// Number of rows in the batch
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    /// Whether the batch has no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column names in projection order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Value at (column index, row index)
    pub fn value(&self, col: usize, row: usize) -> &Value {
        &self.columns[col][row]
    }
}

/// One immutable columnar partition
#[derive(Debug, Clone)]
pub struct Partition {
    key: PartitionKey,
    columns: HashMap<String, Vec<Value>>,
    row_count: usize,
    ts_min: i64,
    ts_max: i64,
}

impl Partition {
    /// Build a partition from the events of one (kind, day) pair
    ///
    /// Events are sorted ascending by timestamp and derived temporal columns
    /// are materialized. Events whose kind or day disagree with the key are
    /// the caller's bug; they are stored as-is.
    pub fn from_events(key: PartitionKey, mut events: Vec<EventRecord>) -> Self {
        events.sort_by_key(|e| e.ts);

        let n = events.len();
        let mut columns: HashMap<String, Vec<Value>> = HashMap::new();
        let mut push = |name: &str, value: Value| {
            columns
                .entry(name.to_string())
                .or_insert_with(|| Vec::with_capacity(n))
                .push(value);
        };

        for e in &events {
            push("ts", Value::Int(e.ts));
            push("type", Value::Str(e.kind.as_str().to_string()));
            push("auction_id", Value::Str(e.auction_id.clone()));
            push("advertiser_id", Value::Int(e.advertiser_id));
            push("publisher_id", Value::Int(e.publisher_id));
            push("bid_price", e.bid_price.map_or(Value::Null, Value::Float));
            push("user_id", Value::Int(e.user_id));
            push(
                "total_price",
                e.total_price.map_or(Value::Null, Value::Float),
            );
            push("country", Value::Str(e.country.clone()));
            push("day", Value::Date(event_day(e.ts)));
            push("week", Value::Date(event_week(e.ts)));
            push("hour", Value::Str(event_hour(e.ts)));
            push("minute", Value::Str(event_minute(e.ts)));
        }

        let ts_min = events.first().map_or(0, |e| e.ts);
        let ts_max = events.last().map_or(0, |e| e.ts);

        Self {
            key,
            columns,
            row_count: n,
            ts_min,
            ts_max,
        }
    }

    /// Partition identity
    pub fn key(&self) -> PartitionKey {
        self.key
    }

    /// Metadata snapshot for pruning
    pub fn meta(&self) -> PartitionMeta {
        PartitionMeta {
            key: self.key,
            row_count: self.row_count,
            ts_min: self.ts_min,
            ts_max: self.ts_max,
        }
    }

    /// Number of rows in the partition
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    fn column(&self, name: &str) -> Result<&[Value], StoreError> {
        self.columns
            .get(name)
            .map(|c| c.as_slice())
            .ok_or_else(|| StoreError::ColumnNotAvailable {
                column: name.to_string(),
                kind: self.key.kind,
                day: self.key.day,
            })
    }

    /// Scan the partition: evaluate `filters` row-wise, then project the
    /// passing rows into the requested columns
    ///
    /// Filters may reference columns outside the projection; both are
    /// resolved against the partition's own column set.
    pub fn scan(&self, columns: &[String], filters: &[Filter]) -> Result<ColumnBatch, StoreError> {
        let projected: Vec<&[Value]> = columns
            .iter()
            .map(|name| self.column(name))
            .collect::<Result<_, _>>()?;
        let filter_cols: Vec<&[Value]> = filters
            .iter()
            .map(|f| self.column(&f.column))
            .collect::<Result<_, _>>()?;

        let mut out: Vec<Vec<Value>> = columns.iter().map(|_| Vec::new()).collect();
        for row in 0..self.row_count {
            let passes = filters
                .iter()
                .zip(&filter_cols)
                .all(|(f, col)| f.matches(&col[row]));
            if passes {
                for (dst, src) in out.iter_mut().zip(&projected) {
                    dst.push(src[row].clone());
                }
            }
        }

        Ok(ColumnBatch::new(columns.to_vec(), out))
    }
}
