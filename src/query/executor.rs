//! Query executor
//!
//! Runs a [`Plan`] against the store. Partition scans accumulate partial
//! aggregates per partition and merge them with a commutative, associative
//! merge, so partitions can be processed in any order and in parallel.
//! Grouped output is always sorted by group key ascending before `order_by`
//! applies, which makes execution deterministic.

use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tracing::{debug, trace};

use crate::catalog::AggregateCatalog;
use crate::config::ExecutorSettings;
use crate::query::ast::{Aggregate, AggregateFn, Filter, OrderBy, Query, SelectItem, SortDir};
use crate::query::error::{QueryError, QueryResult};
use crate::query::planner::Plan;
use crate::query::result::ResultSet;
use crate::store::{ColumnStore, PartitionKey};
use crate::types::Value;

// ============================================================================
// Accumulators
// ============================================================================

/// Partial aggregate state
///
/// `merge` is commutative and associative; AVG carries (sum, count) and only
/// divides at finalization, so split-batch aggregation equals whole-batch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Accumulator {
    Sum(f64),
    Count(u64),
    Avg { sum: f64, count: u64 },
}

impl Accumulator {
    pub(crate) fn new(aggregate: &Aggregate) -> Self {
        match aggregate.func {
            AggregateFn::Sum => Accumulator::Sum(0.0),
            AggregateFn::Count => Accumulator::Count(0),
            AggregateFn::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
        }
    }

    /// Fold one row in; `None` is the `count(*)` case with no input column
    pub(crate) fn update(&mut self, value: Option<&Value>) {
        match self {
            Accumulator::Sum(acc) => {
                if let Some(v) = value.and_then(Value::as_f64) {
                    *acc += v;
                }
            }
            Accumulator::Count(acc) => match value {
                None => *acc += 1,
                Some(v) if !v.is_null() => *acc += 1,
                Some(_) => {}
            },
            Accumulator::Avg { sum, count } => {
                if let Some(v) = value.and_then(Value::as_f64) {
                    *sum += v;
                    *count += 1;
                }
            }
        }
    }

    pub(crate) fn merge(&mut self, other: &Accumulator) {
        match (self, other) {
            (Accumulator::Sum(a), Accumulator::Sum(b)) => *a += b,
            (Accumulator::Count(a), Accumulator::Count(b)) => *a += b,
            (
                Accumulator::Avg { sum, count },
                Accumulator::Avg {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *count += other_count;
            }
            // Accumulator vectors are built from the same select list, so
            // variants always line up
            _ => {}
        }
    }

    /// Final value: SUM of nothing is 0, COUNT of nothing is 0, AVG of
    /// nothing is null
    pub(crate) fn finalize(&self) -> Value {
        match self {
            Accumulator::Sum(acc) => Value::Float(*acc),
            Accumulator::Count(acc) => Value::Int(*acc as i64),
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Float(sum / *count as f64),
        }
    }
}

type GroupMap = HashMap<Vec<Value>, Vec<Accumulator>>;

// ============================================================================
// Execution stats
// ============================================================================

/// Running execution counters
///
/// Fields are atomics so the executor can be shared immutably across scan
/// workers.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    queries_executed: AtomicU64,
    partitions_read: AtomicU64,
    rows_scanned: AtomicU64,
    catalog_lookups: AtomicU64,
}

impl ExecutionStats {
    /// Total queries executed
    pub fn queries_executed(&self) -> u64 {
        self.queries_executed.load(AtomicOrdering::Relaxed)
    }

    /// Total partitions scanned
    pub fn partitions_read(&self) -> u64 {
        self.partitions_read.load(AtomicOrdering::Relaxed)
    }

    /// Total rows produced by partition scans (post-filter)
    pub fn rows_scanned(&self) -> u64 {
        self.rows_scanned.load(AtomicOrdering::Relaxed)
    }

    /// Total queries answered from the aggregate catalog
    pub fn catalog_lookups(&self) -> u64 {
        self.catalog_lookups.load(AtomicOrdering::Relaxed)
    }
}

// ============================================================================
// Executor
// ============================================================================

/// The query executor
pub struct QueryExecutor {
    config: ExecutorSettings,
    pool: Option<rayon::ThreadPool>,
    stats: ExecutionStats,
}

impl QueryExecutor {
    /// Executor with the given settings
    ///
    /// With `max_parallelism > 0` a dedicated thread pool of that size is
    /// built; otherwise parallel scans run on the global rayon pool.
    pub fn new(config: ExecutorSettings) -> QueryResult<Self> {
        let pool = if config.enable_parallel && config.max_parallelism > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.max_parallelism)
                .build()
                .map_err(|e| {
                    QueryError::internal(format!("failed to build scan pool: {}", e))
                })?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            config,
            pool,
            stats: ExecutionStats::default(),
        })
    }

    /// Execution counters
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Execute a plan for its query
    pub fn execute(
        &self,
        plan: &Plan,
        query: &Query,
        store: &dyn ColumnStore,
        catalog: &AggregateCatalog,
    ) -> QueryResult<ResultSet> {
        self.stats
            .queries_executed
            .fetch_add(1, AtomicOrdering::Relaxed);
        let mut result = match plan {
            Plan::CatalogLookup {
                signature,
                residual,
            } => {
                self.stats
                    .catalog_lookups
                    .fetch_add(1, AtomicOrdering::Relaxed);
                self.execute_catalog(query, catalog, signature, residual)?
            }
            Plan::PartitionScan {
                partitions,
                columns,
                residual,
            }
            | Plan::FullScan {
                partitions,
                columns,
                residual,
            } => self.execute_scan(query, store, partitions, columns, residual)?,
        };

        apply_order_by(&mut result, &query.order_by)?;
        debug!(rows = result.len(), %plan, "query executed");
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Catalog path
    // ------------------------------------------------------------------

    fn execute_catalog(
        &self,
        query: &Query,
        catalog: &AggregateCatalog,
        signature: &crate::catalog::AggregateSignature,
        residual: &[Filter],
    ) -> QueryResult<ResultSet> {
        let table = catalog.lookup(signature).ok_or_else(|| {
            QueryError::not_found(format!("aggregate table {} not registered", signature))
        })?;

        // Each residual filter targets one group-key column of the table.
        let residual_slots: Vec<(usize, &Filter)> = residual
            .iter()
            .map(|f| {
                table
                    .key_index(&f.column)
                    .map(|i| (i, f))
                    .ok_or_else(|| {
                        QueryError::internal(format!(
                            "residual filter on '{}' is not a key of {}",
                            f.column, signature
                        ))
                    })
            })
            .collect::<QueryResult<_>>()?;

        let slots = output_slots(query, |name| table.key_index(name))?;

        let mut matched: Vec<(&Vec<Value>, &Value)> = table
            .rows()
            .iter()
            .filter(|(key, _)| residual_slots.iter().all(|(i, f)| f.matches(&key[*i])))
            .map(|(key, value)| (key, value))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(b.0));

        let rows: Vec<Vec<Value>> = matched
            .into_iter()
            .map(|(key, value)| materialize_row(&slots, key, std::slice::from_ref(value)))
            .collect();

        Ok(ResultSet::new(query.output_columns(), rows))
    }

    // ------------------------------------------------------------------
    // Scan path
    // ------------------------------------------------------------------

    fn execute_scan(
        &self,
        query: &Query,
        store: &dyn ColumnStore,
        partitions: &[PartitionKey],
        columns: &[String],
        residual: &[Filter],
    ) -> QueryResult<ResultSet> {
        self.stats
            .partitions_read
            .fetch_add(partitions.len() as u64, AtomicOrdering::Relaxed);

        if query.group_by.is_empty() && !query.has_aggregates() {
            return self.project_rows(query, store, partitions, columns, residual);
        }

        let aggregates: Vec<Aggregate> =
            query.aggregates().into_iter().cloned().collect();
        let group_by = &query.group_by;

        let scan_one = |key: &PartitionKey| -> QueryResult<GroupMap> {
            let batch = store.scan(key, columns, residual)?;
            self.stats
                .rows_scanned
                .fetch_add(batch.len() as u64, AtomicOrdering::Relaxed);
            trace!(kind = %key.kind, day = %key.day, rows = batch.len(), "scanned partition");

            let key_cols: Vec<&[Value]> = group_by
                .iter()
                .map(|c| column_of(&batch, c))
                .collect::<QueryResult<_>>()?;
            let agg_cols: Vec<Option<&[Value]>> = aggregates
                .iter()
                .map(|a| match &a.column {
                    Some(c) => column_of(&batch, c).map(Some),
                    None => Ok(None),
                })
                .collect::<QueryResult<_>>()?;

            let mut groups: GroupMap = HashMap::new();
            for row in 0..batch.len() {
                let group_key: Vec<Value> =
                    key_cols.iter().map(|col| col[row].clone()).collect();
                let accumulators = groups
                    .entry(group_key)
                    .or_insert_with(|| aggregates.iter().map(Accumulator::new).collect());
                for (acc, col) in accumulators.iter_mut().zip(&agg_cols) {
                    acc.update(col.map(|c| &c[row]));
                }
            }
            Ok(groups)
        };

        let parallel = self.config.enable_parallel
            && partitions.len() >= self.config.parallel_threshold_partitions;
        let partials: Vec<GroupMap> = if parallel {
            let run = || {
                partitions
                    .par_iter()
                    .map(scan_one)
                    .collect::<QueryResult<Vec<_>>>()
            };
            match &self.pool {
                Some(pool) => pool.install(run)?,
                None => run()?,
            }
        } else {
            partitions
                .iter()
                .map(scan_one)
                .collect::<QueryResult<Vec<_>>>()?
        };

        let mut merged: GroupMap = HashMap::new();
        for partial in partials {
            for (key, accumulators) in partial {
                match merged.entry(key) {
                    std::collections::hash_map::Entry::Occupied(mut e) => {
                        for (acc, other) in e.get_mut().iter_mut().zip(&accumulators) {
                            acc.merge(other);
                        }
                    }
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(accumulators);
                    }
                }
            }
        }

        // Ungrouped aggregates always yield one row, even over no input.
        if group_by.is_empty() && merged.is_empty() {
            merged.insert(
                Vec::new(),
                aggregates.iter().map(Accumulator::new).collect(),
            );
        }

        let key_index =
            |name: &str| group_by.iter().position(|c| c == name);
        let slots = output_slots(query, key_index)?;

        let mut entries: Vec<(Vec<Value>, Vec<Accumulator>)> = merged.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let rows: Vec<Vec<Value>> = entries
            .into_iter()
            .map(|(key, accumulators)| {
                let finals: Vec<Value> =
                    accumulators.iter().map(Accumulator::finalize).collect();
                materialize_row(&slots, &key, &finals)
            })
            .collect();

        Ok(ResultSet::new(query.output_columns(), rows))
    }

    // Plain projection: no grouping, no aggregates. Partitions concatenate
    // in plan (canonical) order; rows within a partition keep ts order.
    fn project_rows(
        &self,
        query: &Query,
        store: &dyn ColumnStore,
        partitions: &[PartitionKey],
        columns: &[String],
        residual: &[Filter],
    ) -> QueryResult<ResultSet> {
        let selected: Vec<String> = query.output_columns();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for key in partitions {
            let batch = store.scan(key, columns, residual)?;
            self.stats
                .rows_scanned
                .fetch_add(batch.len() as u64, AtomicOrdering::Relaxed);
            let cols: Vec<&[Value]> = selected
                .iter()
                .map(|c| column_of(&batch, c))
                .collect::<QueryResult<_>>()?;
            for row in 0..batch.len() {
                rows.push(cols.iter().map(|col| col[row].clone()).collect());
            }
        }
        Ok(ResultSet::new(selected, rows))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn column_of<'a>(
    batch: &'a crate::store::ColumnBatch,
    name: &str,
) -> QueryResult<&'a [Value]> {
    batch.column(name).ok_or_else(|| {
        QueryError::internal(format!("column '{}' missing from scan projection", name))
    })
}

// Where each select output comes from: a group-key slot or an aggregate slot.
enum OutputSlot {
    Key(usize),
    Agg(usize),
}

fn output_slots(
    query: &Query,
    key_index: impl Fn(&str) -> Option<usize>,
) -> QueryResult<Vec<OutputSlot>> {
    let mut agg_counter = 0;
    query
        .select
        .iter()
        .map(|item| match item {
            SelectItem::Column(name) => key_index(name).map(OutputSlot::Key).ok_or_else(|| {
                QueryError::internal(format!("select column '{}' has no group slot", name))
            }),
            SelectItem::Aggregate(_) => {
                let slot = OutputSlot::Agg(agg_counter);
                agg_counter += 1;
                Ok(slot)
            }
        })
        .collect()
}

fn materialize_row(slots: &[OutputSlot], key: &[Value], aggregates: &[Value]) -> Vec<Value> {
    slots
        .iter()
        .map(|slot| match slot {
            OutputSlot::Key(i) => key[*i].clone(),
            OutputSlot::Agg(i) => aggregates[*i].clone(),
        })
        .collect()
}

// Stable multi-key sort, primary key first.
fn apply_order_by(result: &mut ResultSet, order_by: &[OrderBy]) -> QueryResult<()> {
    if order_by.is_empty() {
        return Ok(());
    }
    let keys: Vec<(usize, SortDir)> = order_by
        .iter()
        .map(|o| {
            result
                .columns
                .iter()
                .position(|c| c == &o.output)
                .map(|i| (i, o.dir))
                .ok_or_else(|| {
                    QueryError::internal(format!(
                        "order_by output '{}' missing from result",
                        o.output
                    ))
                })
        })
        .collect::<QueryResult<_>>()?;

    result.rows.sort_by(|a, b| {
        for (idx, dir) in &keys {
            let ord = a[*idx].cmp(&b[*idx]);
            let ord = match dir {
                SortDir::Asc => ord,
                SortDir::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
