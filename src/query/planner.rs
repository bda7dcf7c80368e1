//! Query planner
//!
//! Turns a validated [`Query`] into a [`Plan`]: a catalog lookup when a
//! pre-computed aggregate table answers the query exactly, otherwise a
//! partition scan pruned by the kind and day filters, otherwise a full scan.
//! Planning only touches partition metadata, never partition data.

use std::fmt;
use tracing::debug;

use crate::catalog::{AggregateCatalog, AggregateSignature};
use crate::query::ast::{Filter, FilterOp, FilterValue, Query, SelectItem};
use crate::query::error::QueryResult;
use crate::store::{ColumnStore, PartitionKey};
use crate::types::{DayRange, EventKind, Value, DAY_COLUMN, KIND_COLUMN};

pub use crate::config::PlannerSettings;

/// An execution plan
///
/// `FullScan` executes exactly like `PartitionScan`; the distinction exists
/// so diagnostics can tell a pruned scan from an unconstrained one.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Answer from a pre-computed aggregate table
    CatalogLookup {
        /// Signature of the matched aggregate table
        signature: AggregateSignature,
        /// Filters applied to the table's group-key columns
        residual: Vec<Filter>,
    },
    /// Scan a pruned set of partitions
    PartitionScan {
        /// Partitions to visit, in canonical order
        partitions: Vec<PartitionKey>,
        /// Columns to project out of each partition
        columns: Vec<String>,
        /// Filters pushed down into each partition scan
        residual: Vec<Filter>,
    },
    /// Scan every partition (no kind or day constraint)
    FullScan {
        /// All partitions, in canonical order
        partitions: Vec<PartitionKey>,
        /// Columns to project out of each partition
        columns: Vec<String>,
        /// Filters pushed down into each partition scan
        residual: Vec<Filter>,
    },
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::CatalogLookup { signature, residual } => write!(
                f,
                "CatalogLookup({}, {} residual filter(s))",
                signature,
                residual.len()
            ),
            Plan::PartitionScan {
                partitions,
                columns,
                ..
            } => write!(
                f,
                "PartitionScan({} partition(s), {} column(s))",
                partitions.len(),
                columns.len()
            ),
            Plan::FullScan {
                partitions,
                columns,
                ..
            } => write!(
                f,
                "FullScan({} partition(s), {} column(s))",
                partitions.len(),
                columns.len()
            ),
        }
    }
}

/// The query planner
#[derive(Debug, Clone, Default)]
pub struct QueryPlanner {
    config: PlannerSettings,
}

impl QueryPlanner {
    /// Planner with the given settings
    pub fn new(config: PlannerSettings) -> Self {
        Self { config }
    }

    /// Plan a validated query against the store's partition metadata and the
    /// aggregate catalog
    pub fn plan(
        &self,
        query: &Query,
        store: &dyn ColumnStore,
        catalog: &AggregateCatalog,
    ) -> QueryResult<Plan> {
        if self.config.enable_catalog_routing {
            if let Some((signature, residual)) = self.try_catalog(query, catalog) {
                debug!(%signature, "routing query to aggregate catalog");
                return Ok(Plan::CatalogLookup {
                    signature,
                    residual,
                });
            }
        }

        let columns = projection(query);

        let (kinds, day_filters) = if self.config.enable_partition_pruning {
            (kind_constraint(&query.filters), day_filters(&query.filters))
        } else {
            (None, Vec::new())
        };
        let pruned = kinds.is_some() || !day_filters.is_empty();

        let mut metas = store.list_partitions(kinds.as_deref(), coarse_day_range(&day_filters).as_ref());
        metas.retain(|m| {
            day_filters
                .iter()
                .all(|f| f.matches(&Value::Date(m.key.day)))
        });
        let partitions: Vec<PartitionKey> = metas.into_iter().map(|m| m.key).collect();

        let residual = query.filters.clone();
        let plan = if pruned {
            Plan::PartitionScan {
                partitions,
                columns,
                residual,
            }
        } else {
            Plan::FullScan {
                partitions,
                columns,
                residual,
            }
        };
        debug!(%plan, %query, "planned query");
        Ok(plan)
    }

    // Structural catalog match: a single aggregate whose group_by set equals
    // a registered signature's key set, the kind filter equal to the
    // signature's, and every remaining filter touching only group-key
    // columns. Each catalog row is one group, so those remaining filters can
    // run against table rows directly with no re-aggregation.
    fn try_catalog(
        &self,
        query: &Query,
        catalog: &AggregateCatalog,
    ) -> Option<(AggregateSignature, Vec<Filter>)> {
        let aggregates = query.aggregates();
        if aggregates.len() != 1 {
            return None;
        }
        let has_bare_non_key = query.select.iter().any(|s| {
            matches!(s, SelectItem::Column(c) if !query.group_by.contains(c))
        });
        if has_bare_non_key {
            return None;
        }

        let (kind_filters, rest): (Vec<&Filter>, Vec<&Filter>) = query
            .filters
            .iter()
            .partition(|f| f.column == KIND_COLUMN);
        let kind = match kind_filters.as_slice() {
            [] => None,
            [f] => match (&f.op, &f.value) {
                (FilterOp::Eq, FilterValue::Scalar(Value::Str(s))) => {
                    Some(s.parse::<EventKind>().ok()?)
                }
                _ => return None,
            },
            _ => return None,
        };

        if !rest.iter().all(|f| query.group_by.contains(&f.column)) {
            return None;
        }

        let signature = AggregateSignature::new(
            kind,
            query.group_by.clone(),
            aggregates[0].func,
            aggregates[0].column.clone(),
        );
        if catalog.contains(&signature) {
            Some((signature, rest.into_iter().cloned().collect()))
        } else {
            None
        }
    }
}

// Projection: every column the scan has to materialize.
fn projection(query: &Query) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for item in &query.select {
        match item {
            SelectItem::Column(c) => push_unique(&mut columns, c),
            SelectItem::Aggregate(agg) => {
                if let Some(c) = &agg.column {
                    push_unique(&mut columns, c);
                }
            }
        }
    }
    for c in &query.group_by {
        push_unique(&mut columns, c);
    }
    for f in &query.filters {
        push_unique(&mut columns, &f.column);
    }
    columns
}

fn push_unique(columns: &mut Vec<String>, name: &str) {
    if !columns.iter().any(|c| c == name) {
        columns.push(name.to_string());
    }
}

// Kind constraint from `type` eq/in filters. Multiple constraints intersect;
// `neq` never narrows the scan and stays residual-only. An unknown kind
// string matches no partition.
fn kind_constraint(filters: &[Filter]) -> Option<Vec<EventKind>> {
    let mut constraint: Option<Vec<EventKind>> = None;
    for f in filters.iter().filter(|f| f.column == KIND_COLUMN) {
        let kinds: Vec<EventKind> = match (&f.op, &f.value) {
            (FilterOp::Eq, FilterValue::Scalar(Value::Str(s))) => {
                s.parse::<EventKind>().into_iter().collect()
            }
            (FilterOp::In, FilterValue::List(vs)) => vs
                .iter()
                .filter_map(|v| match v {
                    Value::Str(s) => s.parse::<EventKind>().ok(),
                    _ => None,
                })
                .collect(),
            _ => continue,
        };
        constraint = Some(match constraint {
            None => kinds,
            Some(prev) => prev.into_iter().filter(|k| kinds.contains(k)).collect(),
        });
    }
    constraint
}

// Day filters usable for pruning (eq, between, in).
fn day_filters(filters: &[Filter]) -> Vec<Filter> {
    filters
        .iter()
        .filter(|f| {
            f.column == DAY_COLUMN
                && matches!(f.op, FilterOp::Eq | FilterOp::Between | FilterOp::In)
        })
        .cloned()
        .collect()
}

// Coarse range handed to partition listing. Any single filter's hull is a
// superset of the conjunction; the exact per-filter check runs afterwards.
fn coarse_day_range(day_filters: &[Filter]) -> Option<DayRange> {
    let first = day_filters.first()?;
    match (&first.op, &first.value) {
        (FilterOp::Eq, FilterValue::Scalar(Value::Date(d))) => Some(DayRange::single(*d)),
        (FilterOp::Between, FilterValue::Range(Value::Date(lo), Value::Date(hi))) => {
            Some(DayRange::new(*lo, *hi))
        }
        (FilterOp::In, FilterValue::List(vs)) => {
            let days: Vec<_> = vs
                .iter()
                .filter_map(|v| match v {
                    Value::Date(d) => Some(*d),
                    _ => None,
                })
                .collect();
            let lo = *days.iter().min()?;
            let hi = *days.iter().max()?;
            Some(DayRange::new(lo, hi))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryColumnStore;
    use crate::types::EventRecord;
    use chrono::NaiveDate;

    fn day_millis(d: u32) -> i64 {
        1_704_067_200_000 + i64::from(d - 1) * 86_400_000
    }

    fn store() -> MemoryColumnStore {
        let mut store = MemoryColumnStore::new();
        let mut events = Vec::new();
        for d in 1..=3 {
            events.push(EventRecord::new(day_millis(d), EventKind::Impression).with_bid_price(1.0));
            events.push(EventRecord::new(day_millis(d), EventKind::Click));
        }
        store.load_events(events);
        store
    }

    fn parse(json: &str) -> Query {
        Query::parse_json(json).unwrap()
    }

    fn planner() -> QueryPlanner {
        QueryPlanner::new(PlannerSettings::default())
    }

    #[test]
    fn test_plan_determinism() {
        let store = store();
        let catalog = AggregateCatalog::new();
        let json = r#"{
            "select": ["day", {"SUM": "bid_price"}],
            "where": [{"col": "type", "op": "eq", "val": "impression"}],
            "group_by": ["day"]
        }"#;
        let a = planner().plan(&parse(json), &store, &catalog).unwrap();
        let b = planner().plan(&parse(json), &store, &catalog).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_kind_pruning() {
        let store = store();
        let catalog = AggregateCatalog::new();
        let q = parse(
            r#"{
                "select": [{"COUNT": "*"}],
                "where": [{"col": "type", "op": "eq", "val": "impression"}]
            }"#,
        );
        match planner().plan(&q, &store, &catalog).unwrap() {
            Plan::PartitionScan { partitions, .. } => {
                assert_eq!(partitions.len(), 3);
                assert!(partitions.iter().all(|k| k.kind == EventKind::Impression));
            }
            other => panic!("expected PartitionScan, got {}", other),
        }
    }

    #[test]
    fn test_day_between_pruning() {
        let store = store();
        let catalog = AggregateCatalog::new();
        let q = parse(
            r#"{
                "select": [{"COUNT": "*"}],
                "where": [{"col": "day", "op": "between", "val": ["2024-01-01", "2024-01-02"]}]
            }"#,
        );
        match planner().plan(&q, &store, &catalog).unwrap() {
            Plan::PartitionScan { partitions, .. } => {
                // 2 days x 2 kinds present in the store
                assert_eq!(partitions.len(), 4);
                let limit = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
                assert!(partitions.iter().all(|k| k.day <= limit));
            }
            other => panic!("expected PartitionScan, got {}", other),
        }
    }

    #[test]
    fn test_unconstrained_query_is_full_scan() {
        let store = store();
        let catalog = AggregateCatalog::new();
        let q = parse(r#"{"select": [{"COUNT": "*"}]}"#);
        match planner().plan(&q, &store, &catalog).unwrap() {
            Plan::FullScan { partitions, .. } => assert_eq!(partitions.len(), 6),
            other => panic!("expected FullScan, got {}", other),
        }
    }

    #[test]
    fn test_neq_does_not_prune() {
        let store = store();
        let catalog = AggregateCatalog::new();
        let q = parse(
            r#"{
                "select": [{"COUNT": "*"}],
                "where": [{"col": "type", "op": "neq", "val": "click"}]
            }"#,
        );
        // neq stays residual-only, so the plan is an unconstrained scan
        match planner().plan(&q, &store, &catalog).unwrap() {
            Plan::FullScan { partitions, residual, .. } => {
                assert_eq!(partitions.len(), 6);
                assert_eq!(residual.len(), 1);
            }
            other => panic!("expected FullScan, got {}", other),
        }
    }

    #[test]
    fn test_unknown_kind_matches_nothing() {
        let store = store();
        let catalog = AggregateCatalog::new();
        let q = parse(
            r#"{
                "select": [{"COUNT": "*"}],
                "where": [{"col": "type", "op": "in", "val": ["conversion"]}]
            }"#,
        );
        match planner().plan(&q, &store, &catalog).unwrap() {
            Plan::PartitionScan { partitions, .. } => assert!(partitions.is_empty()),
            other => panic!("expected PartitionScan, got {}", other),
        }
    }

    #[test]
    fn test_projection_covers_filters_and_aggregates() {
        let q = parse(
            r#"{
                "select": ["day", {"SUM": "bid_price"}],
                "where": [{"col": "country", "op": "eq", "val": "US"}],
                "group_by": ["day"]
            }"#,
        );
        let cols = projection(&q);
        assert_eq!(cols, vec!["day", "bid_price", "country"]);
    }

    #[test]
    fn test_catalog_routing() {
        let store = store();
        let mut catalog = AggregateCatalog::new();
        let signature = AggregateSignature::new(
            Some(EventKind::Impression),
            vec!["day".to_string()],
            crate::query::AggregateFn::Sum,
            Some("bid_price".to_string()),
        );
        catalog
            .register_from_store(signature.clone(), &store)
            .unwrap();

        let q = parse(
            r#"{
                "select": ["day", {"SUM": "bid_price"}],
                "where": [{"col": "type", "op": "eq", "val": "impression"}],
                "group_by": ["day"]
            }"#,
        );
        match planner().plan(&q, &store, &catalog).unwrap() {
            Plan::CatalogLookup {
                signature: matched,
                residual,
            } => {
                assert_eq!(matched, signature);
                assert!(residual.is_empty());
            }
            other => panic!("expected CatalogLookup, got {}", other),
        }
    }

    #[test]
    fn test_catalog_routing_rejects_non_key_filter() {
        let store = store();
        let mut catalog = AggregateCatalog::new();
        let signature = AggregateSignature::new(
            Some(EventKind::Impression),
            vec!["day".to_string()],
            crate::query::AggregateFn::Sum,
            Some("bid_price".to_string()),
        );
        catalog
            .register_from_store(signature, &store)
            .unwrap();

        // country is not a group key of the registered table
        let q = parse(
            r#"{
                "select": ["day", {"SUM": "bid_price"}],
                "where": [
                    {"col": "type", "op": "eq", "val": "impression"},
                    {"col": "country", "op": "eq", "val": "US"}
                ],
                "group_by": ["day"]
            }"#,
        );
        let plan = planner().plan(&q, &store, &catalog).unwrap();
        assert!(matches!(plan, Plan::PartitionScan { .. }));
    }

    #[test]
    fn test_routing_disabled() {
        let store = store();
        let mut catalog = AggregateCatalog::new();
        let signature = AggregateSignature::new(
            Some(EventKind::Impression),
            vec!["day".to_string()],
            crate::query::AggregateFn::Sum,
            Some("bid_price".to_string()),
        );
        catalog
            .register_from_store(signature, &store)
            .unwrap();

        let planner = QueryPlanner::new(PlannerSettings {
            enable_catalog_routing: false,
            enable_partition_pruning: true,
        });
        let q = parse(
            r#"{
                "select": ["day", {"SUM": "bid_price"}],
                "where": [{"col": "type", "op": "eq", "val": "impression"}],
                "group_by": ["day"]
            }"#,
        );
        let plan = planner.plan(&q, &store, &catalog).unwrap();
        assert!(matches!(plan, Plan::PartitionScan { .. }));
    }
}
