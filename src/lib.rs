//! Eventum - Analytical query engine for partitioned event logs
//!
//! This library answers grouped, filtered, aggregated queries (SUM, COUNT,
//! AVG over a column, grouped by up to a few dimensions) against an
//! append-only ad-event log that is too large to scan naively:
//! - Partitioned columnar storage keyed by (event kind, calendar day)
//! - Pre-computed aggregate tables routed to via a declarative catalog
//! - Partition pruning from kind and day filters
//! - Parallel partition scans merged through associative accumulators
//! - Bounded LRU result cache keyed by the canonical query encoding

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod error;
pub mod store;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Query engine façade wiring cache, planner, and executor together
pub mod engine;

/// Query pipeline: AST, planning, execution, result cache
/// Provides partition pruning, catalog routing, and parallel aggregation
pub mod query;

// Re-export main types
pub use catalog::{AggregateCatalog, AggregateSignature, AggregateTable};
pub use engine::QueryEngine;
pub use error::{Error, Result};
pub use query::{Plan, Query, QueryError, ResultSet};
pub use store::{ColumnStore, MemoryColumnStore, PartitionKey, PartitionMeta};
pub use types::{EventKind, EventRecord, Value};
