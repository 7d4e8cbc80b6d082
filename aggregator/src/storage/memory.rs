//! In-memory row store
//!
//! All connections share one table behind a lock. Used for tests and dry runs;
//! aggregates are not persisted across restarts.

use super::{RowStore, StoreConnector};
use crate::error::{AggregatorError, Result};
use async_trait::async_trait;
use loadfold_shared::types::aggregate::{AggregateKey, AggregateRow};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Shared {
    rows: RwLock<HashMap<AggregateKey, AggregateRow>>,
    max_connections: Option<usize>,
    open: AtomicUsize,
    opened_total: AtomicUsize,
    closed_total: AtomicUsize,
    reads: AtomicU64,
    writes: AtomicU64,
}

/// Shared in-memory aggregate table. Cloning yields another handle to the same table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRowStore {
    shared: Arc<Shared>,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connections beyond `max` open at once.
    pub fn with_max_connections(max: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_connections: Some(max),
                ..Shared::default()
            }),
        }
    }

    /// Create or overwrite a bucket directly, bypassing connections and counters.
    pub fn seed(&self, key: AggregateKey, row: AggregateRow) {
        if let Ok(mut rows) = self.shared.rows.write() {
            rows.insert(key, row);
        }
    }

    pub fn get(&self, key: &AggregateKey) -> Option<AggregateRow> {
        self.shared
            .rows
            .read()
            .ok()
            .and_then(|rows| rows.get(key).copied())
    }

    pub fn len(&self) -> usize {
        self.shared.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All buckets ordered by key
    pub fn snapshot(&self) -> Vec<(AggregateKey, AggregateRow)> {
        let mut rows: Vec<_> = self
            .shared
            .rows
            .read()
            .map(|rows| rows.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        rows.sort_by_key(|(key, _)| *key);
        rows
    }

    /// Point lookups served so far
    pub fn reads(&self) -> u64 {
        self.shared.reads.load(Ordering::Relaxed)
    }

    /// Mutating statements served so far
    pub fn writes(&self) -> u64 {
        self.shared.writes.load(Ordering::Relaxed)
    }

    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> usize {
        self.shared.opened_total.load(Ordering::SeqCst)
    }

    pub fn closed_total(&self) -> usize {
        self.shared.closed_total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for InMemoryRowStore {
    async fn connect(&self) -> Result<Box<dyn RowStore>> {
        let shared = &self.shared;
        let acquired = shared
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |open| {
                match shared.max_connections {
                    Some(max) if open >= max => None,
                    _ => Some(open + 1),
                }
            });
        if acquired.is_err() {
            return Err(AggregatorError::ConnectionFailure(format!(
                "in-memory store connection limit ({}) reached",
                shared.max_connections.unwrap_or_default()
            )));
        }
        shared.opened_total.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shared: self.shared.clone(),
            open: true,
        }))
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

/// One handle onto the shared in-memory table
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    open: bool,
}

impl MemoryConnection {
    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(AggregatorError::ConnectionFailure(
                "connection already closed".to_string(),
            ))
        }
    }

    fn poisoned<E: std::fmt::Display>(e: E) -> AggregatorError {
        AggregatorError::QueryFailure(e.to_string())
    }
}

#[async_trait]
impl RowStore for MemoryConnection {
    async fn fetch(&mut self, key: &AggregateKey) -> Result<Option<AggregateRow>> {
        self.check_open()?;
        self.shared.reads.fetch_add(1, Ordering::Relaxed);
        let rows = self.shared.rows.read().map_err(Self::poisoned)?;
        Ok(rows.get(key).copied())
    }

    async fn write(&mut self, key: &AggregateKey, row: &AggregateRow) -> Result<bool> {
        self.check_open()?;
        self.shared.writes.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.shared.rows.write().map_err(Self::poisoned)?;
        match rows.get_mut(key) {
            Some(existing) => {
                *existing = *row;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add(&mut self, key: &AggregateKey, value: f64) -> Result<Option<AggregateRow>> {
        self.check_open()?;
        self.shared.writes.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.shared.rows.write().map_err(Self::poisoned)?;
        Ok(rows.get_mut(key).map(|row| {
            *row = row.fold(value);
            *row
        }))
    }

    async fn upsert(&mut self, key: &AggregateKey, value: f64) -> Result<AggregateRow> {
        self.check_open()?;
        self.shared.writes.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.shared.rows.write().map_err(Self::poisoned)?;
        let row = rows
            .entry(*key)
            .and_modify(|row| *row = row.fold(value))
            .or_insert_with(|| AggregateRow::first(value));
        Ok(*row)
    }

    async fn insert(&mut self, key: &AggregateKey, row: &AggregateRow) -> Result<()> {
        self.check_open()?;
        self.shared.writes.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.shared.rows.write().map_err(Self::poisoned)?;
        if rows.contains_key(key) {
            return Err(AggregatorError::QueryFailure(format!(
                "duplicate key {}",
                key
            )));
        }
        rows.insert(*key, *row);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
            self.shared.closed_total.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AggregateKey {
        AggregateKey::new(1, 3, 7)
    }

    #[tokio::test]
    async fn test_add_requires_existing_row() {
        let store = InMemoryRowStore::new();
        let mut conn = store.connect().await.unwrap();

        assert_eq!(conn.add(&key(), 5.0).await.unwrap(), None);
        assert!(store.is_empty());

        store.seed(key(), AggregateRow::new(10.0, 2));
        let row = conn.add(&key(), 5.0).await.unwrap();
        assert_eq!(row, Some(AggregateRow::new(15.0, 3)));
        assert_eq!(store.get(&key()), Some(AggregateRow::new(15.0, 3)));
    }

    #[tokio::test]
    async fn test_upsert_creates_then_folds() {
        let store = InMemoryRowStore::new();
        let mut conn = store.connect().await.unwrap();

        assert_eq!(conn.upsert(&key(), 2.0).await.unwrap(), AggregateRow::new(2.0, 1));
        assert_eq!(conn.upsert(&key(), 3.0).await.unwrap(), AggregateRow::new(5.0, 2));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_write_and_insert() {
        let store = InMemoryRowStore::new();
        let mut conn = store.connect().await.unwrap();

        assert!(!conn.write(&key(), &AggregateRow::new(1.0, 1)).await.unwrap());
        conn.insert(&key(), &AggregateRow::new(1.0, 1)).await.unwrap();
        assert!(conn.insert(&key(), &AggregateRow::new(1.0, 1)).await.is_err());
        assert!(conn.write(&key(), &AggregateRow::new(4.0, 2)).await.unwrap());
        assert_eq!(conn.fetch(&key()).await.unwrap(), Some(AggregateRow::new(4.0, 2)));
        assert_eq!(store.reads(), 1);
        assert_eq!(store.writes(), 4);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = InMemoryRowStore::new();
        let mut conn = store.connect().await.unwrap();
        assert_eq!(store.open_connections(), 1);

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(store.open_connections(), 0);
        assert_eq!(store.closed_total(), 1);
        assert!(matches!(
            conn.fetch(&key()).await,
            Err(AggregatorError::ConnectionFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let store = InMemoryRowStore::with_max_connections(1);
        let mut first = store.connect().await.unwrap();
        assert!(matches!(
            store.connect().await,
            Err(AggregatorError::ConnectionFailure(_))
        ));

        first.close().await.unwrap();
        assert!(store.connect().await.is_ok());
        assert_eq!(store.opened_total(), 2);
    }
}
