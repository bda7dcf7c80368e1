//! Pre-computed aggregate catalog
//!
//! The catalog is a declarative map from [`AggregateSignature`] to
//! [`AggregateTable`]. The planner matches queries against registered
//! signatures structurally; there is no per-table matching code, so adding a
//! new pre-computed aggregate is one `register_from_store` call.
//!
//! Every table is an exact algebraic summary built from the store itself, so
//! catalog answers are always equal to the scan answers they replace.

use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::query::ast::{Aggregate, AggregateFn};
use crate::query::error::{QueryError, QueryResult};
use crate::query::executor::Accumulator;
use crate::store::ColumnStore;
use crate::types::{EventKind, Value};

/// Identity of a pre-computed aggregate table
///
/// Two signatures are equal when they summarize the same thing: same implicit
/// kind filter, same group-key set, same aggregate. Group keys are kept
/// sorted so key order in the query never matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateSignature {
    /// Implicit kind filter baked into the table, if any
    pub kind: Option<EventKind>,
    /// Group-key columns, sorted
    pub group_by: Vec<String>,
    /// Aggregate function
    pub agg: AggregateFn,
    /// Aggregate input column; `None` for `count(*)`
    pub column: Option<String>,
}

impl AggregateSignature {
    /// Create a signature; group keys are sorted internally
    pub fn new(
        kind: Option<EventKind>,
        mut group_by: Vec<String>,
        agg: AggregateFn,
        column: Option<String>,
    ) -> Self {
        group_by.sort();
        Self {
            kind,
            group_by,
            agg,
            column,
        }
    }

    fn aggregate(&self) -> Aggregate {
        Aggregate {
            func: self.agg,
            column: self.column.clone(),
        }
    }
}

impl fmt::Display for AggregateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) by [{}]",
            self.agg.as_str(),
            self.column.as_deref().unwrap_or("*"),
            self.group_by.join(", ")
        )?;
        if let Some(kind) = self.kind {
            write!(f, " where type={}", kind)?;
        }
        Ok(())
    }
}

/// One pre-computed aggregate table: group keys mapped to one aggregate value
#[derive(Debug, Clone)]
pub struct AggregateTable {
    /// Group-key columns, in signature (sorted) order
    group_by: Vec<String>,
    /// One row per group: key values in `group_by` order, plus the aggregate
    rows: Vec<(Vec<Value>, Value)>,
}

impl AggregateTable {
    /// Build a table by scanning every partition the signature covers
    pub fn build(store: &dyn ColumnStore, signature: &AggregateSignature) -> QueryResult<Self> {
        let kinds = signature.kind.map(|k| vec![k]);
        let mut columns = signature.group_by.clone();
        if let Some(col) = &signature.column {
            if !columns.contains(col) {
                columns.push(col.clone());
            }
        }

        let aggregate = signature.aggregate();
        let mut groups: HashMap<Vec<Value>, Accumulator> = HashMap::new();
        for meta in store.list_partitions(kinds.as_deref(), None) {
            let batch = store.scan(&meta.key, &columns, &[])?;
            let key_cols: Vec<&[Value]> = signature
                .group_by
                .iter()
                .map(|c| {
                    batch.column(c).ok_or_else(|| {
                        QueryError::internal(format!("column '{}' missing from scan", c))
                    })
                })
                .collect::<QueryResult<_>>()?;
            let agg_col = match &signature.column {
                Some(c) => Some(batch.column(c).ok_or_else(|| {
                    QueryError::internal(format!("column '{}' missing from scan", c))
                })?),
                None => None,
            };

            for row in 0..batch.len() {
                let key: Vec<Value> = key_cols.iter().map(|col| col[row].clone()).collect();
                let acc = groups
                    .entry(key)
                    .or_insert_with(|| Accumulator::new(&aggregate));
                acc.update(agg_col.map(|c| &c[row]));
            }
        }

        let mut rows: Vec<(Vec<Value>, Value)> = groups
            .into_iter()
            .map(|(key, acc)| (key, acc.finalize()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            group_by: signature.group_by.clone(),
            rows,
        })
    }

    /// Position of a column within the group key, if it is one
    pub fn key_index(&self, column: &str) -> Option<usize> {
        self.group_by.iter().position(|c| c == column)
    }

    /// Table rows: group-key values plus the aggregate value
    pub fn rows(&self) -> &[(Vec<Value>, Value)] {
        &self.rows
    }

    /// Number of groups in the table
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no groups
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Declarative registry of pre-computed aggregate tables
#[derive(Debug, Default)]
pub struct AggregateCatalog {
    tables: HashMap<AggregateSignature, AggregateTable>,
}

impl AggregateCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pre-built table under its signature
    pub fn register(&mut self, signature: AggregateSignature, table: AggregateTable) {
        debug!(%signature, groups = table.len(), "registered aggregate table");
        self.tables.insert(signature, table);
    }

    /// Build a table from the store and register it
    pub fn register_from_store(
        &mut self,
        signature: AggregateSignature,
        store: &dyn ColumnStore,
    ) -> QueryResult<()> {
        let table = AggregateTable::build(store, &signature)?;
        self.register(signature, table);
        Ok(())
    }

    /// Look up a table by signature
    pub fn lookup(&self, signature: &AggregateSignature) -> Option<&AggregateTable> {
        self.tables.get(signature)
    }

    /// Whether a signature is registered
    pub fn contains(&self, signature: &AggregateSignature) -> bool {
        self.tables.contains_key(signature)
    }

    /// Number of registered tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The production aggregate set: daily revenue, publisher/day/country
    /// revenue, country purchase averages, advertiser-by-kind counts, and
    /// per-minute revenue
    pub fn standard(store: &dyn ColumnStore) -> QueryResult<Self> {
        let signatures = [
            AggregateSignature::new(
                Some(EventKind::Impression),
                vec!["day".to_string()],
                AggregateFn::Sum,
                Some("bid_price".to_string()),
            ),
            AggregateSignature::new(
                Some(EventKind::Impression),
                vec![
                    "publisher_id".to_string(),
                    "day".to_string(),
                    "country".to_string(),
                ],
                AggregateFn::Sum,
                Some("bid_price".to_string()),
            ),
            AggregateSignature::new(
                Some(EventKind::Purchase),
                vec!["country".to_string()],
                AggregateFn::Avg,
                Some("total_price".to_string()),
            ),
            AggregateSignature::new(
                None,
                vec!["advertiser_id".to_string(), "type".to_string()],
                AggregateFn::Count,
                None,
            ),
            AggregateSignature::new(
                Some(EventKind::Impression),
                vec!["day".to_string(), "minute".to_string()],
                AggregateFn::Sum,
                Some("bid_price".to_string()),
            ),
        ];

        let mut catalog = Self::new();
        for signature in signatures {
            catalog.register_from_store(signature, store)?;
        }
        Ok(catalog)
    }
}
