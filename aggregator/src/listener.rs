//! Host lifecycle hooks: `init`, `start`, `process_events`, `close`.
//!
//! The value column is set exactly once; processing before `init` fails fast
//! with `ConfigurationMissing`. `start` acquires every worker connection up
//! front and `close` releases them all, however many times it is called.

use crate::config::{AggregatorConfig, FailurePolicy};
use crate::error::{AggregatorError, Result};
use crate::fold::{Aggregator, BatchReport, FoldSettings};
use crate::storage::StoreConnector;
use crate::worker::WorkerPool;
use loadfold_shared::types::events::ChangeEvent;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct AggregationListener {
    connector: Arc<dyn StoreConnector>,
    config: AggregatorConfig,
    aggregator: OnceCell<Arc<Aggregator>>,
    pool: RwLock<Option<WorkerPool>>,
}

impl AggregationListener {
    pub fn new(connector: Arc<dyn StoreConnector>, config: AggregatorConfig) -> Self {
        Self {
            connector,
            config,
            aggregator: OnceCell::new(),
            pool: RwLock::new(None),
        }
    }

    /// Set the event column that supplies the measurement. May be called once.
    pub fn init(&self, value_column: &str) -> Result<()> {
        let value_column = value_column.trim();
        if value_column.is_empty() {
            return Err(AggregatorError::ConfigurationMissing);
        }
        let settings = FoldSettings::from_config(&self.config, value_column)?;
        self.aggregator
            .set(Arc::new(Aggregator::new(settings)))
            .map_err(|_| {
                AggregatorError::AlreadyInitialized(
                    self.aggregator
                        .get()
                        .map(|a| a.settings().value_column.clone())
                        .unwrap_or_default(),
                )
            })?;
        info!("Folding value column '{}'", value_column);
        Ok(())
    }

    /// Acquire the worker connections. A second call is a no-op.
    pub async fn start(&self) -> Result<()> {
        let aggregator = self
            .aggregator
            .get()
            .cloned()
            .ok_or(AggregatorError::ConfigurationMissing)?;

        let mut pool = self.pool.write().await;
        if pool.is_some() {
            return Ok(());
        }
        *pool = Some(
            WorkerPool::start(
                self.connector.clone(),
                aggregator,
                self.config.workers,
                self.config.queue_depth,
            )
            .await?,
        );
        Ok(())
    }

    /// Whether `start` succeeded and `close` has not been called since
    pub async fn is_running(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// Fold a batch and return the detailed report.
    pub async fn process_batch(&self, events: Vec<ChangeEvent>) -> Result<BatchReport> {
        if self.aggregator.get().is_none() {
            return Err(AggregatorError::ConfigurationMissing);
        }
        let pool = self.pool.read().await;
        let pool = pool.as_ref().ok_or(AggregatorError::NotStarted)?;
        pool.submit(events).await
    }

    /// Host entry point. Returns `true` once the batch has been handled, even if
    /// individual events were dropped; under the strict failure policy a batch
    /// that was cut short returns `false`.
    pub async fn process_events(&self, events: Vec<ChangeEvent>) -> Result<bool> {
        let report = self.process_batch(events).await?;
        if !report.is_clean() {
            warn!(
                "Batch handled with {} dropped and {} unprocessed events",
                report.dropped_count(),
                report.unprocessed
            );
        }
        Ok(match self.config.failure_policy {
            FailurePolicy::BestEffort => true,
            FailurePolicy::Strict => !report.aborted,
        })
    }

    /// Release every worker connection. Safe to call repeatedly.
    pub async fn close(&self) {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
    }
}
