//! Row-store backends
//!
//! A `StoreConnector` hands out connections; each `RowStore` is one connection,
//! exclusively owned by one worker for its whole lifetime.

pub mod memory;
pub mod postgres;

use crate::config::StorageConfig;
use crate::error::Result;
use async_trait::async_trait;
use loadfold_shared::types::aggregate::{AggregateKey, AggregateRow};
use std::sync::Arc;
use std::time::Duration;

/// One connection to the aggregate table.
#[async_trait]
pub trait RowStore: Send {
    /// Point lookup of a bucket.
    async fn fetch(&mut self, key: &AggregateKey) -> Result<Option<AggregateRow>>;

    /// Overwrite a bucket. Returns `false` if no row matched the key.
    async fn write(&mut self, key: &AggregateKey, row: &AggregateRow) -> Result<bool>;

    /// Atomically fold `value` into an existing bucket, returning the new row,
    /// or `None` if the bucket does not exist.
    async fn add(&mut self, key: &AggregateKey, value: f64) -> Result<Option<AggregateRow>>;

    /// Atomically fold `value` into a bucket, creating it as `(value, 1)` if absent.
    async fn upsert(&mut self, key: &AggregateKey, value: f64) -> Result<AggregateRow>;

    /// Create a bucket. Fails if the key already exists.
    async fn insert(&mut self, key: &AggregateKey, row: &AggregateRow) -> Result<()>;

    /// Release the connection. Safe to call more than once; later calls are no-ops.
    async fn close(&mut self) -> Result<()>;
}

/// Source of row-store connections.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RowStore>>;

    /// Short backend name for logs
    fn describe(&self) -> String;
}

/// Build the connector selected by the storage configuration.
pub fn connector_from_config(
    storage: &StorageConfig,
    connect_timeout: Duration,
) -> Arc<dyn StoreConnector> {
    match storage {
        StorageConfig::Postgres { url, table } => Arc::new(
            postgres::PgConnector::new(url.clone(), table.clone())
                .with_connect_timeout(connect_timeout),
        ),
        StorageConfig::InMemory => Arc::new(memory::InMemoryRowStore::new()),
    }
}
