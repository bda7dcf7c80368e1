//! Query AST and JSON query parsing
//!
//! Queries arrive as declarative JSON objects:
//!
//! ```json
//! {
//!   "from": "events",
//!   "select": ["day", {"SUM": "bid_price"}],
//!   "where": [{"col": "type", "op": "eq", "val": "impression"}],
//!   "group_by": ["day"],
//!   "order_by": [{"col": "day", "dir": "asc"}]
//! }
//! ```
//!
//! Parsing produces the loosely-typed raw spec; validation turns it into the
//! exhaustively matchable [`Query`] AST with filter values coerced to the
//! column's schema type. Everything downstream (planner, executor, cache key)
//! works on the validated AST only.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::query::error::{QueryError, QueryResult};
use crate::types::{column_type, ColumnType, Value, TABLE_NAME};

// ============================================================================
// Raw JSON query spec
// ============================================================================

/// Loosely-typed query object as it arrives over the wire
#[derive(Debug, Deserialize)]
pub struct QuerySpec {
    #[serde(default = "default_table")]
    from: String,
    select: Vec<RawSelect>,
    #[serde(rename = "where", default)]
    filters: Vec<RawFilter>,
    #[serde(default)]
    group_by: Vec<String>,
    #[serde(default)]
    order_by: Vec<RawOrderBy>,
}

fn default_table() -> String {
    TABLE_NAME.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSelect {
    Column(String),
    // Single-key object, e.g. {"SUM": "bid_price"} or {"COUNT": "*"}
    Aggregate(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
struct RawFilter {
    col: String,
    op: String,
    val: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawOrderBy {
    col: String,
    #[serde(default = "default_dir")]
    dir: String,
}

fn default_dir() -> String {
    "asc".to_string()
}

// ============================================================================
// Validated AST
// ============================================================================

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    /// Sum of a numeric column
    Sum,
    /// Row or non-null value count
    Count,
    /// Mean of a numeric column
    Avg,
}

impl AggregateFn {
    /// Lowercase name, used in output column headers
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "sum",
            AggregateFn::Count => "count",
            AggregateFn::Avg => "avg",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SUM" => Some(AggregateFn::Sum),
            "COUNT" => Some(AggregateFn::Count),
            "AVG" => Some(AggregateFn::Avg),
            _ => None,
        }
    }
}

/// One aggregate expression: a function over a column, or `COUNT(*)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Aggregate {
    /// The aggregate function
    pub func: AggregateFn,
    /// Input column; `None` means `*` (COUNT only)
    pub column: Option<String>,
}

impl Aggregate {
    /// Output column header, e.g. `sum(bid_price)` or `count(*)`
    pub fn output_name(&self) -> String {
        match &self.column {
            Some(col) => format!("{}({})", self.func.as_str(), col),
            None => format!("{}(*)", self.func.as_str()),
        }
    }
}

/// One entry of the select list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SelectItem {
    /// A bare column (must be part of `group_by` when grouping)
    Column(String),
    /// An aggregate expression
    Aggregate(Aggregate),
}

impl SelectItem {
    /// Output column header for this select entry
    pub fn output_name(&self) -> String {
        match self {
            SelectItem::Column(name) => name.clone(),
            SelectItem::Aggregate(agg) => agg.output_name(),
        }
    }
}

/// Filter comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equal
    Eq,
    /// Not equal
    Neq,
    /// Member of a list
    In,
    /// Inside an inclusive range
    Between,
}

/// Typed filter operand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Single comparison value (eq, neq)
    Scalar(Value),
    /// Membership list (in)
    List(Vec<Value>),
    /// Inclusive range bounds (between)
    Range(Value, Value),
}

impl FilterValue {
    fn rank(&self) -> u8 {
        match self {
            FilterValue::Scalar(_) => 0,
            FilterValue::List(_) => 1,
            FilterValue::Range(_, _) => 2,
        }
    }
}

// Total ordering so filters can be put in a canonical order for cache keys.
impl Ord for FilterValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (FilterValue::Scalar(a), FilterValue::Scalar(b)) => a.cmp(b),
            (FilterValue::List(a), FilterValue::List(b)) => a.cmp(b),
            (FilterValue::Range(alo, ahi), FilterValue::Range(blo, bhi)) => {
                alo.cmp(blo).then_with(|| ahi.cmp(bhi))
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for FilterValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One WHERE condition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    /// Column the condition applies to
    pub column: String,
    /// Comparison operator
    pub op: FilterOp,
    /// Typed operand, coerced to the column's schema type
    pub value: FilterValue,
}

impl Filter {
    /// Evaluate the condition against a single value
    ///
    /// Null never matches, under any operator.
    pub fn matches(&self, value: &Value) -> bool {
        if value.is_null() {
            return false;
        }
        match (&self.op, &self.value) {
            (FilterOp::Eq, FilterValue::Scalar(v)) => value == v,
            (FilterOp::Neq, FilterValue::Scalar(v)) => value != v,
            (FilterOp::In, FilterValue::List(vs)) => vs.contains(value),
            (FilterOp::Between, FilterValue::Range(lo, hi)) => value >= lo && value <= hi,
            // Operator/operand mismatches are rejected at validation
            _ => false,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

/// One ORDER BY key, referencing a select output by header name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBy {
    /// Output column header this key sorts by
    pub output: String,
    /// Sort direction
    pub dir: SortDir,
}

/// A validated query, ready for planning
///
/// Field order is fixed so the serde serialization doubles as the canonical
/// cache key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    /// Select list, in output order
    pub select: Vec<SelectItem>,
    /// Conjunction of WHERE conditions
    pub filters: Vec<Filter>,
    /// Grouping columns
    pub group_by: Vec<String>,
    /// Sort keys, primary first
    pub order_by: Vec<OrderBy>,
}

impl Query {
    /// Parse and validate a JSON query object
    pub fn parse_json(json: &str) -> QueryResult<Self> {
        let spec: QuerySpec = serde_json::from_str(json)
            .map_err(|e| QueryError::parse(format!("malformed query object: {}", e)))?;
        Self::from_spec(spec)
    }

    /// Validate a raw query spec into the typed AST
    pub fn from_spec(spec: QuerySpec) -> QueryResult<Self> {
        if spec.from != TABLE_NAME {
            return Err(QueryError::validation(format!(
                "unknown table '{}'",
                spec.from
            )));
        }
        if spec.select.is_empty() {
            return Err(QueryError::validation("select list is empty"));
        }

        let select = spec
            .select
            .into_iter()
            .map(validate_select_item)
            .collect::<QueryResult<Vec<_>>>()?;

        for col in &spec.group_by {
            if column_type(col).is_none() {
                return Err(QueryError::validation(format!(
                    "unknown column '{}' in group_by",
                    col
                )));
            }
        }

        validate_shape(&select, &spec.group_by)?;

        let filters = spec
            .filters
            .into_iter()
            .map(validate_filter)
            .collect::<QueryResult<Vec<_>>>()?;

        let outputs: Vec<String> = select.iter().map(|s| s.output_name()).collect();
        let order_by = spec
            .order_by
            .into_iter()
            .map(|o| validate_order_by(o, &outputs))
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(Query {
            select,
            filters,
            group_by: spec.group_by,
            order_by,
        })
    }

    /// Output column headers, in select order
    pub fn output_columns(&self) -> Vec<String> {
        self.select.iter().map(|s| s.output_name()).collect()
    }

    /// Aggregate expressions in the select list, in select order
    pub fn aggregates(&self) -> Vec<&Aggregate> {
        self.select
            .iter()
            .filter_map(|s| match s {
                SelectItem::Aggregate(agg) => Some(agg),
                SelectItem::Column(_) => None,
            })
            .collect()
    }

    /// Whether the select list contains any aggregate
    pub fn has_aggregates(&self) -> bool {
        self.select
            .iter()
            .any(|s| matches!(s, SelectItem::Aggregate(_)))
    }

    /// Canonical encoding of the validated AST, used as the cache key
    ///
    /// Filters are a conjunction and `in` lists are sets, so both are sorted
    /// before serialization; reordering either in the source query yields the
    /// same key. Serialization of the AST cannot fail; the fallback empty
    /// string would only merge cache entries, never corrupt results.
    pub fn canonical_key(&self) -> String {
        let mut normalized = self.clone();
        for filter in &mut normalized.filters {
            if let FilterValue::List(values) = &mut filter.value {
                values.sort();
            }
        }
        normalized.filters.sort_by(|a, b| {
            a.column
                .cmp(&b.column)
                .then_with(|| a.op.cmp(&b.op))
                .then_with(|| a.value.cmp(&b.value))
        });
        serde_json::to_string(&normalized).unwrap_or_default()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select [{}]", self.output_columns().join(", "))?;
        if !self.group_by.is_empty() {
            write!(f, " group by [{}]", self.group_by.join(", "))?;
        }
        if !self.filters.is_empty() {
            write!(f, " with {} filter(s)", self.filters.len())?;
        }
        Ok(())
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_select_item(raw: RawSelect) -> QueryResult<SelectItem> {
    match raw {
        RawSelect::Column(name) => {
            if column_type(&name).is_none() {
                return Err(QueryError::validation(format!(
                    "unknown column '{}' in select",
                    name
                )));
            }
            Ok(SelectItem::Column(name))
        }
        RawSelect::Aggregate(map) => {
            if map.len() != 1 {
                return Err(QueryError::validation(
                    "aggregate select entry must have exactly one function key",
                ));
            }
            // len checked above
            let (func_name, col) = map.into_iter().next().ok_or_else(|| {
                QueryError::internal("empty aggregate entry after arity check")
            })?;
            let func = AggregateFn::parse(&func_name).ok_or_else(|| {
                QueryError::validation(format!("unknown aggregate function '{}'", func_name))
            })?;
            if col == "*" {
                if func != AggregateFn::Count {
                    return Err(QueryError::validation(format!(
                        "{}(*) is not supported; only count(*)",
                        func.as_str()
                    )));
                }
                return Ok(SelectItem::Aggregate(Aggregate { func, column: None }));
            }
            let ty = column_type(&col).ok_or_else(|| {
                QueryError::validation(format!("unknown column '{}' in aggregate", col))
            })?;
            if matches!(func, AggregateFn::Sum | AggregateFn::Avg)
                && !matches!(ty, ColumnType::Int | ColumnType::Float)
            {
                return Err(QueryError::validation(format!(
                    "{}({}) requires a numeric column",
                    func.as_str(),
                    col
                )));
            }
            Ok(SelectItem::Aggregate(Aggregate {
                func,
                column: Some(col),
            }))
        }
    }
}

// Bare select columns and group_by must agree: every non-aggregated select
// column appears in group_by and vice versa. Without group_by, bare columns
// and aggregates cannot mix.
fn validate_shape(select: &[SelectItem], group_by: &[String]) -> QueryResult<()> {
    let bare: HashSet<&str> = select
        .iter()
        .filter_map(|s| match s {
            SelectItem::Column(c) => Some(c.as_str()),
            SelectItem::Aggregate(_) => None,
        })
        .collect();
    let has_aggregates = select
        .iter()
        .any(|s| matches!(s, SelectItem::Aggregate(_)));

    if group_by.is_empty() {
        if has_aggregates && !bare.is_empty() {
            return Err(QueryError::validation(
                "select mixes bare columns and aggregates without group_by",
            ));
        }
        return Ok(());
    }

    let keys: HashSet<&str> = group_by.iter().map(String::as_str).collect();
    for col in &bare {
        if !keys.contains(col) {
            return Err(QueryError::validation(format!(
                "select column '{}' is not in group_by",
                col
            )));
        }
    }
    for key in &keys {
        if !bare.contains(key) {
            return Err(QueryError::validation(format!(
                "group_by column '{}' is not in select",
                key
            )));
        }
    }
    Ok(())
}

fn validate_filter(raw: RawFilter) -> QueryResult<Filter> {
    let ty = column_type(&raw.col).ok_or_else(|| {
        QueryError::validation(format!("unknown column '{}' in where", raw.col))
    })?;

    let op = match raw.op.as_str() {
        "eq" => FilterOp::Eq,
        "neq" => FilterOp::Neq,
        "in" => FilterOp::In,
        "between" => FilterOp::Between,
        other => {
            return Err(QueryError::validation(format!(
                "unknown filter operator '{}'",
                other
            )))
        }
    };

    let value = match op {
        FilterOp::Eq | FilterOp::Neq => FilterValue::Scalar(coerce(&raw.val, ty, &raw.col)?),
        FilterOp::In => {
            let items = raw.val.as_array().ok_or_else(|| {
                QueryError::validation(format!("'in' filter on '{}' requires a list", raw.col))
            })?;
            FilterValue::List(
                items
                    .iter()
                    .map(|v| coerce(v, ty, &raw.col))
                    .collect::<QueryResult<Vec<_>>>()?,
            )
        }
        FilterOp::Between => {
            let items = raw.val.as_array().ok_or_else(|| {
                QueryError::validation(format!(
                    "'between' filter on '{}' requires two bounds",
                    raw.col
                ))
            })?;
            if items.len() != 2 {
                return Err(QueryError::validation(format!(
                    "'between' filter on '{}' requires exactly two bounds, got {}",
                    raw.col,
                    items.len()
                )));
            }
            let lo = coerce(&items[0], ty, &raw.col)?;
            let hi = coerce(&items[1], ty, &raw.col)?;
            FilterValue::Range(lo, hi)
        }
    };

    Ok(Filter {
        column: raw.col,
        op,
        value,
    })
}

// Coerce a JSON operand to the column's schema type
fn coerce(val: &serde_json::Value, ty: ColumnType, col: &str) -> QueryResult<Value> {
    let mismatch = || {
        QueryError::validation(format!(
            "filter value {} does not match the type of column '{}'",
            val, col
        ))
    };
    match ty {
        ColumnType::Int => val.as_i64().map(Value::Int).ok_or_else(mismatch),
        ColumnType::Float => val.as_f64().map(Value::Float).ok_or_else(mismatch),
        ColumnType::Str => val
            .as_str()
            .map(|s| Value::Str(s.to_string()))
            .ok_or_else(mismatch),
        ColumnType::Date => {
            let s = val.as_str().ok_or_else(mismatch)?;
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| mismatch())
        }
    }
}

fn validate_order_by(raw: RawOrderBy, outputs: &[String]) -> QueryResult<OrderBy> {
    // Output headers are matched case-insensitively, so "SUM(bid_price)"
    // finds "sum(bid_price)".
    let output = outputs
        .iter()
        .find(|o| o.eq_ignore_ascii_case(&raw.col))
        .cloned()
        .ok_or_else(|| {
            QueryError::validation(format!(
                "order_by column '{}' is not a select output",
                raw.col
            ))
        })?;
    let dir = match raw.dir.to_ascii_lowercase().as_str() {
        "asc" => SortDir::Asc,
        "desc" => SortDir::Desc,
        other => {
            return Err(QueryError::validation(format!(
                "unknown sort direction '{}'",
                other
            )))
        }
    };
    Ok(OrderBy { output, dir })
}

// ============================================================================
// Tests
// ============================================================================
