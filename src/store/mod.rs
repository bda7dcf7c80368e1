//! Partitioned columnar storage
//!
//! The engine reads event data through the [`ColumnStore`] trait: partition
//! metadata for pruning, and projected/filtered scans of individual
//! partitions. [`MemoryColumnStore`] is the in-memory implementation; the
//! external preparation step hands it raw events via
//! [`MemoryColumnStore::load_events`].

mod partition;

pub use partition::{ColumnBatch, Partition, PartitionKey, PartitionMeta};

use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::query::Filter;
use crate::types::{event_day, DayRange, EventKind, EventRecord};

/// Errors surfaced by the storage layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested partition does not exist
    #[error("partition not found: {kind}/{day}")]
    PartitionNotFound {
        /// Event kind of the missing partition
        kind: EventKind,
        /// Day of the missing partition
        day: NaiveDate,
    },

    /// A scan referenced a column the partition does not carry
    #[error("column '{column}' not available in partition {kind}/{day}")]
    ColumnNotAvailable {
        /// The missing column
        column: String,
        /// Event kind of the partition
        kind: EventKind,
        /// Day of the partition
        day: NaiveDate,
    },
}

/// Read interface over a partitioned columnar event store
///
/// Implementations must be shareable across scan workers.
pub trait ColumnStore: Send + Sync {
    /// List partition metadata, optionally restricted to the given kinds
    /// and/or day range, in canonical order (day ascending, then kind
    /// lexicographic)
    fn list_partitions(
        &self,
        kinds: Option<&[EventKind]>,
        days: Option<&DayRange>,
    ) -> Vec<PartitionMeta>;

    /// Scan one partition: apply `filters` row-wise and project the passing
    /// rows into `columns`
    fn scan(
        &self,
        key: &PartitionKey,
        columns: &[String],
        filters: &[Filter],
    ) -> Result<ColumnBatch, StoreError>;
}

/// In-memory partitioned store
///
/// Partitions are keyed by `(day, kind)` in a `BTreeMap`, so iteration order
/// is already the canonical partition order.
#[derive(Debug, Default)]
pub struct MemoryColumnStore {
    partitions: BTreeMap<PartitionKey, Partition>,
}

impl MemoryColumnStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Partition a batch of raw events into the store
    ///
    /// Events are bucketed by (kind, UTC day); each bucket becomes one
    /// immutable partition. Loading the same (kind, day) twice replaces the
    /// earlier partition.
    pub fn load_events(&mut self, events: Vec<EventRecord>) {
        let mut buckets: BTreeMap<PartitionKey, Vec<EventRecord>> = BTreeMap::new();
        for event in events {
            let key = PartitionKey::new(event.kind, event_day(event.ts));
            buckets.entry(key).or_default().push(event);
        }
        for (key, bucket) in buckets {
            debug!(
                kind = %key.kind,
                day = %key.day,
                rows = bucket.len(),
                "loading partition"
            );
            self.partitions.insert(key, Partition::from_events(key, bucket));
        }
    }

    /// Number of partitions currently held
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Total row count across all partitions
    pub fn row_count(&self) -> usize {
        self.partitions.values().map(|p| p.row_count()).sum()
    }
}

impl ColumnStore for MemoryColumnStore {
    fn list_partitions(
        &self,
        kinds: Option<&[EventKind]>,
        days: Option<&DayRange>,
    ) -> Vec<PartitionMeta> {
        self.partitions
            .values()
            .filter(|p| {
                let key = p.key();
                kinds.map_or(true, |ks| ks.contains(&key.kind))
                    && days.map_or(true, |r| r.contains(key.day))
            })
            .map(|p| p.meta())
            .collect()
    }

    fn scan(
        &self,
        key: &PartitionKey,
        columns: &[String],
        filters: &[Filter],
    ) -> Result<ColumnBatch, StoreError> {
        let partition = self
            .partitions
            .get(key)
            .ok_or(StoreError::PartitionNotFound {
                kind: key.kind,
                day: key.day,
            })?;
        partition.scan(columns, filters)
    }
}
