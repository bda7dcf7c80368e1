//! Query pipeline
//!
//! A query arrives as a declarative JSON object, is validated into a typed
//! AST ([`Query`]), planned into a [`Plan`] (catalog lookup, pruned partition
//! scan, or full scan), executed by the [`QueryExecutor`], and its result
//! cached by the [`ResultCache`] under the query's canonical encoding.

pub mod ast;
pub mod cache;
pub mod error;
pub mod executor;
pub mod planner;
pub mod result;

pub use ast::{
    Aggregate, AggregateFn, Filter, FilterOp, FilterValue, OrderBy, Query, SelectItem, SortDir,
};
pub use cache::{CacheStats, ResultCache};
pub use error::{QueryError, QueryErrorKind};
pub use executor::{ExecutionStats, QueryExecutor};
pub use planner::{Plan, QueryPlanner};
pub use result::ResultSet;
