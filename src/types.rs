//! Core data types used throughout the engine
//!
//! This module defines the fundamental data structures used across the system:
//!
//! # Key Types
//!
//! - **`EventRecord`**: A single raw event from the append-only log
//! - **`EventKind`**: The closed set of event kinds (serve, impression, click, purchase)
//! - **`Value`**: Tagged scalar flowing through scans, grouping, and results
//! - **`DayRange`**: Inclusive calendar-day window used for partition pruning
//!
//! The derived temporal keys (`day`, `week`, `hour`, `minute`) are pure
//! functions of the event timestamp, defined once here and used by both
//! partition construction and the executor, so the two can never disagree.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Name of the single logical table all queries read from
pub const TABLE_NAME: &str = "events";

/// Column carrying the event kind (the first partitioning dimension)
pub const KIND_COLUMN: &str = "type";

/// Column carrying the calendar day (the second partitioning dimension)
pub const DAY_COLUMN: &str = "day";

// ============================================================================
// Event Kind
// ============================================================================

/// The closed enumeration of event kinds in the log
///
/// Each (kind, day) pair maps to exactly one immutable partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Ad served to an auction
    Serve,
    /// Ad impression (carries `bid_price`)
    Impression,
    /// Ad click
    Click,
    /// Purchase event (carries `total_price`)
    Purchase,
}

impl EventKind {
    /// All event kinds, in log order
    pub const ALL: [EventKind; 4] = [
        EventKind::Serve,
        EventKind::Impression,
        EventKind::Click,
        EventKind::Purchase,
    ];

    /// Stable string form, matching the raw `type` column values
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Serve => "serve",
            EventKind::Impression => "impression",
            EventKind::Click => "click",
            EventKind::Purchase => "purchase",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serve" => Ok(EventKind::Serve),
            "impression" => Ok(EventKind::Impression),
            "click" => Ok(EventKind::Click),
            "purchase" => Ok(EventKind::Purchase),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

// Partitions are visited in a fixed canonical order (day ascending, then
// kind lexicographic) so that tie-breaking is reproducible across runs.
impl Ord for EventKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for EventKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Event Record
// ============================================================================

/// A single raw event, as handed over by the preparation step
///
/// `bid_price` is only present on impressions and `total_price` only on
/// purchases; both are `None` everywhere else.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Event time, milliseconds since the Unix epoch
    pub ts: i64,
    /// Event kind
    pub kind: EventKind,
    /// Auction identifier
    pub auction_id: String,
    /// Advertiser identifier
    pub advertiser_id: i64,
    /// Publisher identifier
    pub publisher_id: i64,
    /// Bid price (impressions only)
    pub bid_price: Option<f64>,
    /// User identifier
    pub user_id: i64,
    /// Purchase total (purchases only)
    pub total_price: Option<f64>,
    /// ISO country code
    pub country: String,
}

impl EventRecord {
    /// Create a record with the given time and kind; other fields zeroed
    pub fn new(ts: i64, kind: EventKind) -> Self {
        Self {
            ts,
            kind,
            auction_id: String::new(),
            advertiser_id: 0,
            publisher_id: 0,
            bid_price: None,
            user_id: 0,
            total_price: None,
            country: String::new(),
        }
    }

    /// Set the bid price
    pub fn with_bid_price(mut self, price: f64) -> Self {
        self.bid_price = Some(price);
        self
    }

    /// Set the purchase total
    pub fn with_total_price(mut self, total: f64) -> Self {
        self.total_price = Some(total);
        self
    }

    /// Set the country code
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    /// Set the advertiser id
    pub fn with_advertiser(mut self, id: i64) -> Self {
        self.advertiser_id = id;
        self
    }

    /// Set the publisher id
    pub fn with_publisher(mut self, id: i64) -> Self {
        self.publisher_id = id;
        self
    }
}

// ============================================================================
// Derived temporal keys
// ============================================================================

fn event_datetime(ts: i64) -> DateTime<Utc> {
    // Timestamps outside chrono's representable range clamp to the epoch
    DateTime::from_timestamp_millis(ts).unwrap_or_default()
}

/// Calendar day (UTC) of an event timestamp
pub fn event_day(ts: i64) -> NaiveDate {
    event_datetime(ts).date_naive()
}

/// Monday-aligned start of the ISO week containing the timestamp
pub fn event_week(ts: i64) -> NaiveDate {
    let day = event_day(ts);
    let offset = day.weekday().num_days_from_monday() as u64;
    day.checked_sub_days(Days::new(offset)).unwrap_or(day)
}

/// Hour bucket, rendered as `YYYY-MM-DD HH:00`
pub fn event_hour(ts: i64) -> String {
    event_datetime(ts).format("%Y-%m-%d %H:00").to_string()
}

/// Minute bucket, rendered as `YYYY-MM-DD HH:MM`
pub fn event_minute(ts: i64) -> String {
    event_datetime(ts).format("%Y-%m-%d %H:%M").to_string()
}

// ============================================================================
// Day Range
// ============================================================================

/// Inclusive calendar-day window, used for partition pruning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayRange {
    /// First day in the range (inclusive)
    pub start: NaiveDate,
    /// Last day in the range (inclusive)
    pub end: NaiveDate,
}

impl DayRange {
    /// Create a range; bounds are normalized so `start <= end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Single-day range
    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// Check whether a day falls inside the range (both bounds inclusive)
    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }
}

// ============================================================================
// Value
// ============================================================================

/// Tagged scalar value flowing through scans, group keys, and results
///
/// Cross-type comparisons order by type rank; within a type the natural
/// ordering applies. Floats hash by bit pattern so values can serve as
/// group keys.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value (missing column value, AVG over zero rows)
    Null,
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Calendar date
    Date(NaiveDate),
}

impl Value {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Whether this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Date(_) => 4,
        }
    }

    /// Stable textual rendering for tabular output
    ///
    /// Numbers render with full precision and no locale formatting; null
    /// renders as the empty string.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            Value::Null => {}
            Value::Int(i) => i.hash(state),
            Value::Float(f) => state.write_u64(f.to_bits()),
            Value::Str(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Scalar type of a column, used to type filter values at validation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit integer column
    Int,
    /// 64-bit float column
    Float,
    /// String column
    Str,
    /// Calendar-date column
    Date,
}

/// The fixed schema of the logical `events` table, derived columns included
pub const SCHEMA: &[(&str, ColumnType)] = &[
    ("ts", ColumnType::Int),
    ("type", ColumnType::Str),
    ("auction_id", ColumnType::Str),
    ("advertiser_id", ColumnType::Int),
    ("publisher_id", ColumnType::Int),
    ("bid_price", ColumnType::Float),
    ("user_id", ColumnType::Int),
    ("total_price", ColumnType::Float),
    ("country", ColumnType::Str),
    ("day", ColumnType::Date),
    ("week", ColumnType::Date),
    ("hour", ColumnType::Str),
    ("minute", ColumnType::Str),
];

/// Look up the type of a column, or `None` for unknown columns
pub fn column_type(name: &str) -> Option<ColumnType> {
    SCHEMA
        .iter()
        .find(|(col, _)| *col == name)
        .map(|(_, ty)| *ty)
}

// ============================================================================
// Tests
// ============================================================================
