//! Aggregator error type

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    /// A row-store connection could not be acquired (or was already released)
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// A lookup or write statement failed
    #[error("query failure: {0}")]
    QueryFailure(String),

    #[error("value column is not configured; call init() before processing events")]
    ConfigurationMissing,

    #[error("value column is already set to '{0}'")]
    AlreadyInitialized(String),

    #[error("row store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker pool is not running")]
    NotStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = AggregatorError> = std::result::Result<T, E>;
