//! Error types for the engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Query error (validation, planning, or execution)
    #[error("Query error: {0}")]
    Query(#[from] crate::query::QueryError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// General error
    #[error("{0}")]
    General(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
