//! End-to-end engine scenarios: planning, pruning, catalog routing,
//! aggregation correctness, and result caching.

use std::sync::Arc;

use eventum::config::EngineConfig;
use eventum::{
    AggregateCatalog, EventKind, EventRecord, MemoryColumnStore, Plan, Query, QueryEngine, Value,
};

// 2024-01-01 00:00:00 UTC plus whole days and seconds
fn ts(day: u32, secs: i64) -> i64 {
    1_704_067_200_000 + i64::from(day - 1) * 86_400_000 + secs * 1000
}

// Three days of impressions with bid sums 6.0 / 9.0 / 6.0, plus clicks and
// purchases for pruning and catalog scenarios.
fn fixture() -> Vec<EventRecord> {
    let mut events = Vec::new();

    let bids: [(u32, &[f64]); 3] = [
        (1, &[1.0, 2.0, 3.0]),
        (2, &[4.0, 5.0]),
        (3, &[6.0]),
    ];
    for (day, prices) in bids {
        for (i, price) in prices.iter().enumerate() {
            events.push(
                EventRecord::new(ts(day, i as i64 * 60), EventKind::Impression)
                    .with_bid_price(*price)
                    .with_publisher(i64::from(day))
                    .with_advertiser(100)
                    .with_country(if i % 2 == 0 { "US" } else { "JP" }),
            );
        }
    }

    for day in 1..=3 {
        events.push(
            EventRecord::new(ts(day, 30), EventKind::Click)
                .with_advertiser(100)
                .with_country("US"),
        );
    }
    events.push(
        EventRecord::new(ts(1, 90), EventKind::Purchase)
            .with_total_price(10.0)
            .with_country("US"),
    );
    events.push(
        EventRecord::new(ts(2, 90), EventKind::Purchase)
            .with_total_price(30.0)
            .with_country("US"),
    );
    events.push(
        EventRecord::new(ts(3, 90), EventKind::Purchase)
            .with_total_price(8.0)
            .with_country("JP"),
    );

    events
}

fn store() -> MemoryColumnStore {
    let mut store = MemoryColumnStore::new();
    store.load_events(fixture());
    store
}

fn engine_with(config: EngineConfig, catalog: bool) -> QueryEngine {
    let store = store();
    let catalog = if catalog {
        AggregateCatalog::standard(&store).unwrap()
    } else {
        AggregateCatalog::new()
    };
    QueryEngine::new(Arc::new(store), catalog, config).unwrap()
}

fn engine() -> QueryEngine {
    engine_with(EngineConfig::default(), false)
}

const DAILY_REVENUE: &str = r#"{
    "select": ["day", {"SUM": "bid_price"}],
    "where": [{"col": "type", "op": "eq", "val": "impression"}],
    "group_by": ["day"],
    "order_by": [{"col": "day", "dir": "asc"}]
}"#;

#[test]
fn daily_revenue_sums_per_day() {
    let engine = engine();
    let result = engine.execute_json(DAILY_REVENUE).unwrap();
    assert_eq!(result.columns, vec!["day", "sum(bid_price)"]);
    let sums: Vec<&Value> = result.rows.iter().map(|r| &r[1]).collect();
    assert_eq!(
        sums,
        vec![&Value::Float(6.0), &Value::Float(9.0), &Value::Float(6.0)]
    );
}

#[test]
fn plans_are_deterministic() {
    let engine = engine();
    let query = Query::parse_json(DAILY_REVENUE).unwrap();
    let a = engine.plan(&query).unwrap();
    let b = engine.plan(&query).unwrap();
    assert_eq!(a, b);
}

#[test]
fn aggregation_matches_brute_force() {
    let engine = engine();
    let result = engine
        .execute_json(
            r#"{
                "select": ["country", {"SUM": "bid_price"}, {"COUNT": "*"}, {"AVG": "bid_price"}],
                "where": [{"col": "type", "op": "eq", "val": "impression"}],
                "group_by": ["country"]
            }"#,
        )
        .unwrap();

    // Recompute from the raw fixture
    let mut expected: std::collections::BTreeMap<String, (f64, i64)> =
        std::collections::BTreeMap::new();
    for e in fixture() {
        if e.kind == EventKind::Impression {
            let entry = expected.entry(e.country.clone()).or_default();
            entry.0 += e.bid_price.unwrap();
            entry.1 += 1;
        }
    }

    assert_eq!(result.len(), expected.len());
    for (row, (country, (sum, count))) in result.rows.iter().zip(&expected) {
        assert_eq!(row[0], Value::Str(country.clone()));
        assert_eq!(row[1], Value::Float(*sum));
        assert_eq!(row[2], Value::Int(*count));
        match &row[3] {
            Value::Float(avg) => assert!((avg - sum / *count as f64).abs() < 1e-9),
            other => panic!("expected float avg, got {:?}", other),
        }
    }
}

#[test]
fn catalog_and_scan_agree() {
    let routed = engine_with(EngineConfig::default(), true);
    let mut no_routing = EngineConfig::default();
    no_routing.planner.enable_catalog_routing = false;
    let scanned = engine_with(no_routing, true);

    let queries = [
        DAILY_REVENUE,
        r#"{
            "select": ["country", {"AVG": "total_price"}],
            "where": [{"col": "type", "op": "eq", "val": "purchase"}],
            "group_by": ["country"]
        }"#,
        r#"{
            "select": ["advertiser_id", "type", {"COUNT": "*"}],
            "group_by": ["advertiser_id", "type"]
        }"#,
    ];

    for json in queries {
        let query = Query::parse_json(json).unwrap();
        assert!(
            matches!(routed.plan(&query).unwrap(), Plan::CatalogLookup { .. }),
            "expected catalog routing for {}",
            json
        );
        let a = routed.execute(&query).unwrap();
        let b = scanned.execute(&query).unwrap();
        assert_eq!(a, b, "catalog and scan answers differ for {}", json);
    }
}

#[test]
fn catalog_residual_filter_is_exact() {
    let engine = engine_with(EngineConfig::default(), true);
    let query = Query::parse_json(
        r#"{
            "select": ["day", "publisher_id", "country", {"SUM": "bid_price"}],
            "where": [
                {"col": "type", "op": "eq", "val": "impression"},
                {"col": "publisher_id", "op": "eq", "val": 2}
            ],
            "group_by": ["day", "publisher_id", "country"]
        }"#,
    )
    .unwrap();
    assert!(matches!(
        engine.plan(&query).unwrap(),
        Plan::CatalogLookup { .. }
    ));
    let result = engine.execute(&query).unwrap();
    assert!(!result.is_empty());
    for row in &result.rows {
        assert_eq!(row[1], Value::Int(2));
    }
}

#[test]
fn day_between_prunes_to_range() {
    let engine = engine();
    let result = engine
        .execute_json(
            r#"{
                "select": ["day", {"SUM": "bid_price"}],
                "where": [
                    {"col": "type", "op": "eq", "val": "impression"},
                    {"col": "day", "op": "between", "val": ["2024-01-02", "2024-01-02"]}
                ],
                "group_by": ["day"]
            }"#,
        )
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0][1], Value::Float(9.0));
    // One impression partition per day; only day 2 was visited
    assert_eq!(engine.stats().partitions_read(), 1);
}

#[test]
fn full_scan_visits_every_partition() {
    let engine = engine();
    let query = Query::parse_json(r#"{"select": [{"COUNT": "*"}]}"#).unwrap();
    match engine.plan(&query).unwrap() {
        // 3 days x 3 kinds present in the fixture
        Plan::FullScan { partitions, .. } => assert_eq!(partitions.len(), 9),
        other => panic!("expected FullScan, got {:?}", other),
    }
    let result = engine.execute(&query).unwrap();
    assert_eq!(result.rows[0][0], Value::Int(fixture().len() as i64));
}

#[test]
fn cache_is_idempotent() {
    let engine = engine();
    let first = engine.execute_json(DAILY_REVENUE).unwrap();
    let second = engine.execute_json(DAILY_REVENUE).unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.stats().queries_executed(), 1);

    engine.clear_cache();
    let third = engine.execute_json(DAILY_REVENUE).unwrap();
    assert_eq!(first, third);
    assert_eq!(engine.stats().queries_executed(), 2);
}

#[test]
fn merge_order_does_not_change_aggregates() {
    // Sequential execution merges partials in canonical partition order;
    // parallel execution merges them in scheduler order. The accumulator
    // merge is commutative and associative, so the answers must agree.
    let events = fixture();
    let mut whole = MemoryColumnStore::new();
    whole.load_events(events.clone());

    let query = Query::parse_json(
        r#"{
            "select": ["country", {"AVG": "bid_price"}],
            "where": [{"col": "type", "op": "eq", "val": "impression"}],
            "group_by": ["country"]
        }"#,
    )
    .unwrap();

    let engine_whole = QueryEngine::with_defaults(Arc::new(whole)).unwrap();
    let a = engine_whole.execute(&query).unwrap();

    // Parallel execution merges per-partition partials in scheduler order
    let mut parallel_cfg = EngineConfig::default();
    parallel_cfg.executor.parallel_threshold_partitions = 1;
    parallel_cfg.executor.max_parallelism = 2;
    let mut parallel_store = MemoryColumnStore::new();
    parallel_store.load_events(events);
    let engine_parallel =
        QueryEngine::new(Arc::new(parallel_store), AggregateCatalog::new(), parallel_cfg).unwrap();
    let b = engine_parallel.execute(&query).unwrap();

    assert_eq!(a.columns, b.columns);
    for (ra, rb) in a.rows.iter().zip(&b.rows) {
        assert_eq!(ra[0], rb[0]);
        match (&ra[1], &rb[1]) {
            (Value::Float(x), Value::Float(y)) => assert!((x - y).abs() < 1e-9),
            other => panic!("expected float averages, got {:?}", other),
        }
    }
}

#[test]
fn grouped_count_with_no_matches_yields_zero_rows() {
    let engine = engine();
    let result = engine
        .execute_json(
            r#"{
                "select": ["country", {"COUNT": "*"}],
                "where": [{"col": "country", "op": "eq", "val": "DE"}],
                "group_by": ["country"]
            }"#,
        )
        .unwrap();
    assert!(result.is_empty());
    assert_eq!(result.columns, vec!["country", "count(*)"]);
}

#[test]
fn ungrouped_aggregates_over_no_matches_yield_one_row() {
    let engine = engine();
    let result = engine
        .execute_json(
            r#"{
                "select": [{"COUNT": "*"}, {"SUM": "bid_price"}, {"AVG": "bid_price"}],
                "where": [{"col": "country", "op": "eq", "val": "DE"}]
            }"#,
        )
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(
        result.rows[0],
        vec![Value::Int(0), Value::Float(0.0), Value::Null]
    );
}

#[test]
fn minute_revenue_via_catalog() {
    let engine = engine_with(EngineConfig::default(), true);
    let query = Query::parse_json(
        r#"{
            "select": ["day", "minute", {"SUM": "bid_price"}],
            "where": [
                {"col": "type", "op": "eq", "val": "impression"},
                {"col": "day", "op": "eq", "val": "2024-01-01"}
            ],
            "group_by": ["day", "minute"]
        }"#,
    )
    .unwrap();
    assert!(matches!(
        engine.plan(&query).unwrap(),
        Plan::CatalogLookup { .. }
    ));
    let result = engine.execute(&query).unwrap();
    // Day 1 has three impressions one minute apart
    assert_eq!(result.len(), 3);
    let total: f64 = result
        .rows
        .iter()
        .map(|r| match &r[2] {
            Value::Float(f) => *f,
            _ => 0.0,
        })
        .sum();
    assert!((total - 6.0).abs() < 1e-9);
}

#[test]
fn order_by_desc_on_aggregate() {
    let engine = engine();
    let result = engine
        .execute_json(
            r#"{
                "select": ["day", {"SUM": "bid_price"}],
                "where": [{"col": "type", "op": "eq", "val": "impression"}],
                "group_by": ["day"],
                "order_by": [{"col": "sum(bid_price)", "dir": "desc"}]
            }"#,
        )
        .unwrap();
    assert_eq!(result.rows[0][1], Value::Float(9.0));
    // Days 1 and 3 tie at 6.0; the stable sort keeps group-key order
    assert!(result.rows[1][0] < result.rows[2][0]);
}

#[test]
fn validation_errors_surface() {
    let engine = engine();
    assert!(engine
        .execute_json(r#"{"select": [{"SUM": "country"}]}"#)
        .is_err());
    assert!(engine.execute_json(r#"{"select": []}"#).is_err());
    assert!(engine
        .execute_json(
            r#"{"select": ["day"], "order_by": [{"col": "bid_price"}]}"#
        )
        .is_err());
}
