//! Query engine façade
//!
//! Wires the result cache, planner, and executor into one entry point:
//! read-through cache, then plan, then execute, then write-through on
//! success. Failed queries never populate the cache.

use std::sync::Arc;
use tracing::debug;

use crate::catalog::AggregateCatalog;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::query::cache::ResultCache;
use crate::query::executor::{ExecutionStats, QueryExecutor};
use crate::query::planner::{Plan, QueryPlanner};
use crate::query::{Query, ResultSet};
use crate::store::ColumnStore;

/// The query engine
pub struct QueryEngine {
    store: Arc<dyn ColumnStore>,
    catalog: AggregateCatalog,
    planner: QueryPlanner,
    executor: QueryExecutor,
    cache: ResultCache,
}

impl QueryEngine {
    /// Engine over a store and catalog, with the given configuration
    pub fn new(
        store: Arc<dyn ColumnStore>,
        catalog: AggregateCatalog,
        config: EngineConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            catalog,
            planner: QueryPlanner::new(config.planner),
            executor: QueryExecutor::new(config.executor)?,
            cache: ResultCache::new(config.cache),
        })
    }

    /// Engine with an empty catalog and default configuration
    pub fn with_defaults(store: Arc<dyn ColumnStore>) -> Result<Self> {
        Self::new(store, AggregateCatalog::new(), EngineConfig::default())
    }

    /// Execute a validated query
    pub fn execute(&self, query: &Query) -> Result<ResultSet> {
        if let Some(result) = self.cache.get(query) {
            debug!(%query, "result cache hit");
            return Ok(result);
        }

        let plan = self.planner.plan(query, self.store.as_ref(), &self.catalog)?;
        let result = self
            .executor
            .execute(&plan, query, self.store.as_ref(), &self.catalog)?;

        self.cache.put(query, result.clone());
        Ok(result)
    }

    /// Parse, validate, and execute a JSON query object
    pub fn execute_json(&self, json: &str) -> Result<ResultSet> {
        let query = Query::parse_json(json)?;
        self.execute(&query)
    }

    /// Plan a query without executing it, for diagnostics
    pub fn plan(&self, query: &Query) -> Result<Plan> {
        Ok(self.planner.plan(query, self.store.as_ref(), &self.catalog)?)
    }

    /// The aggregate catalog the engine routes to
    pub fn catalog(&self) -> &AggregateCatalog {
        &self.catalog
    }

    /// The result cache
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Execution counters
    pub fn stats(&self) -> &ExecutionStats {
        self.executor.stats()
    }

    /// Drop all cached results
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryColumnStore;
    use crate::types::{EventKind, EventRecord, Value};

    fn day_millis(d: u32) -> i64 {
        1_704_067_200_000 + i64::from(d - 1) * 86_400_000
    }

    fn engine() -> QueryEngine {
        let mut store = MemoryColumnStore::new();
        store.load_events(vec![
            EventRecord::new(day_millis(1), EventKind::Impression).with_bid_price(2.0),
            EventRecord::new(day_millis(2), EventKind::Impression).with_bid_price(3.0),
        ]);
        QueryEngine::with_defaults(Arc::new(store)).unwrap()
    }

    #[test]
    fn test_execute_json() {
        let engine = engine();
        let result = engine
            .execute_json(
                r#"{
                    "select": ["day", {"SUM": "bid_price"}],
                    "where": [{"col": "type", "op": "eq", "val": "impression"}],
                    "group_by": ["day"]
                }"#,
            )
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.rows[0][1], Value::Float(2.0));
    }

    #[test]
    fn test_second_execution_hits_cache() {
        let engine = engine();
        let json = r#"{"select": [{"COUNT": "*"}]}"#;
        let first = engine.execute_json(json).unwrap();
        let second = engine.execute_json(json).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.cache().stats().hits.load(std::sync::atomic::Ordering::Relaxed), 1);
        // The scan ran once; the second answer came from the cache
        assert_eq!(engine.stats().queries_executed(), 1);
    }

    #[test]
    fn test_failed_query_not_cached() {
        let engine = engine();
        assert!(engine.execute_json(r#"{"select": ["no_such"]}"#).is_err());
        assert_eq!(engine.cache().entry_count(), 0);
    }
}
