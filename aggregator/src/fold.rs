//! Folding of change events into aggregate buckets
//!
//! `Aggregator::apply` walks a batch in delivery order. Non-insert events are
//! ignored without touching the store; every other event either lands in its
//! bucket or is dropped with a reason. Drops never abort the batch unless the
//! strict failure policy is configured.

use crate::audit;
use crate::config::{AggregatorConfig, FailurePolicy, FoldMode, MissingRowPolicy};
use crate::error::{AggregatorError, Result};
use crate::metrics;
use crate::storage::RowStore;
use loadfold_shared::types::aggregate::{AggregateKey, AggregateRow};
use loadfold_shared::types::events::{ChangeEvent, FieldError, MeasurementEvent};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Immutable settings shared by every worker
#[derive(Debug, Clone)]
pub struct FoldSettings {
    pub value_column: String,
    pub fold_mode: FoldMode,
    pub missing_row: MissingRowPolicy,
    pub failure_policy: FailurePolicy,
    pub store_timeout: Duration,
}

impl FoldSettings {
    /// Defaults for everything except the value column
    pub fn new(value_column: impl Into<String>) -> Self {
        Self {
            value_column: value_column.into(),
            fold_mode: FoldMode::Atomic,
            missing_row: MissingRowPolicy::Skip,
            failure_policy: FailurePolicy::BestEffort,
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &AggregatorConfig, value_column: &str) -> Result<Self> {
        let store_timeout = config
            .store_timeout()
            .map_err(|e| AggregatorError::InvalidConfig(format!("{:#}", e)))?;
        Ok(Self {
            value_column: value_column.to_string(),
            fold_mode: config.fold_mode,
            missing_row: config.missing_row,
            failure_policy: config.failure_policy,
            store_timeout,
        })
    }
}

/// Why an event was not folded
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// No bucket exists for the key and upserts are disabled
    MissingRow,
    InvalidEvent(FieldError),
    QueryFailure(String),
    ConnectionFailure(String),
    Timeout(Duration),
}

impl DropReason {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::MissingRow => "missing_row",
            DropReason::InvalidEvent(_) => "invalid_event",
            DropReason::QueryFailure(_) => "query_failure",
            DropReason::ConnectionFailure(_) => "connection_failure",
            DropReason::Timeout(_) => "timeout",
        }
    }

    /// Whether the strict policy stops the batch on this drop
    fn aborts_strict_batch(&self) -> bool {
        !matches!(self, DropReason::MissingRow)
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingRow => write!(f, "no aggregate row for key"),
            DropReason::InvalidEvent(e) => write!(f, "{}", e),
            DropReason::QueryFailure(msg) => write!(f, "{}", msg),
            DropReason::ConnectionFailure(msg) => write!(f, "{}", msg),
            DropReason::Timeout(after) => write!(f, "timed out after {:?}", after),
        }
    }
}

impl From<AggregatorError> for DropReason {
    fn from(e: AggregatorError) -> Self {
        match e {
            AggregatorError::Timeout(after) => DropReason::Timeout(after),
            AggregatorError::ConnectionFailure(msg) => DropReason::ConnectionFailure(msg),
            AggregatorError::QueryFailure(msg) => DropReason::QueryFailure(msg),
            other => DropReason::QueryFailure(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroppedEvent {
    /// Position of the event in its batch
    pub index: usize,
    /// Bucket key, if the event got far enough to have one
    pub key: Option<AggregateKey>,
    pub reason: DropReason,
}

/// Per-batch outcome
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub folded: usize,
    pub inserted: usize,
    pub ignored: usize,
    pub dropped: Vec<DroppedEvent>,
    /// Events skipped after a strict-policy abort
    pub unprocessed: usize,
    pub aborted: bool,
}

impl BatchReport {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }

    /// Every event was folded, inserted or ignored
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.unprocessed == 0
    }

    /// Accumulate another report (e.g. over sub-batches)
    pub fn merge(&mut self, other: BatchReport) {
        self.folded += other.folded;
        self.inserted += other.inserted;
        self.ignored += other.ignored;
        self.dropped.extend(other.dropped);
        self.unprocessed += other.unprocessed;
        self.aborted |= other.aborted;
    }
}

/// Result of folding one measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FoldOutcome {
    Folded(AggregateRow),
    Inserted(AggregateRow),
    Missing,
}

/// Folds measurements into buckets through a worker's row store.
/// Holds no state besides its immutable settings.
#[derive(Debug)]
pub struct Aggregator {
    settings: FoldSettings,
}

impl Aggregator {
    pub fn new(settings: FoldSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FoldSettings {
        &self.settings
    }

    /// Process one batch in delivery order.
    pub async fn apply(&self, store: &mut dyn RowStore, events: &[ChangeEvent]) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, event) in events.iter().enumerate() {
            if !event.is_insert() {
                report.ignored += 1;
                continue;
            }

            let dropped = match MeasurementEvent::from_change(event, &self.settings.value_column) {
                Err(e) => Some(DroppedEvent {
                    index,
                    key: None,
                    reason: DropReason::InvalidEvent(e),
                }),
                Ok(measurement) => {
                    let key = measurement.key();
                    let start = Instant::now();
                    let outcome = self.fold(store, &key, measurement.value).await;
                    metrics::FOLD_DURATION.observe(start.elapsed().as_secs_f64());

                    match outcome {
                        Ok(FoldOutcome::Folded(row)) => {
                            debug!("Folded {} into {}: {:?}", measurement.value, key, row);
                            report.folded += 1;
                            None
                        }
                        Ok(FoldOutcome::Inserted(row)) => {
                            debug!("Created {} with {:?}", key, row);
                            report.inserted += 1;
                            None
                        }
                        Ok(FoldOutcome::Missing) => Some(DroppedEvent {
                            index,
                            key: Some(key),
                            reason: DropReason::MissingRow,
                        }),
                        Err(e) => Some(DroppedEvent {
                            index,
                            key: Some(key),
                            reason: e.into(),
                        }),
                    }
                }
            };

            if let Some(dropped) = dropped {
                let abort = self.settings.failure_policy == FailurePolicy::Strict
                    && dropped.reason.aborts_strict_batch();
                record_drop(&dropped);
                report.dropped.push(dropped);
                if abort {
                    report.aborted = true;
                    report.unprocessed = events.len() - index - 1;
                    audit::batch_aborted(index, report.unprocessed);
                    break;
                }
            }
        }

        record_batch(&report);
        report
    }

    /// Fold one measurement according to the configured mode and missing-row policy.
    pub async fn fold(
        &self,
        store: &mut dyn RowStore,
        key: &AggregateKey,
        value: f64,
    ) -> Result<FoldOutcome> {
        match self.settings.fold_mode {
            FoldMode::Atomic => {
                if let Some(row) = self.bounded(store.add(key, value)).await? {
                    return Ok(FoldOutcome::Folded(row));
                }
                match self.settings.missing_row {
                    MissingRowPolicy::Skip => Ok(FoldOutcome::Missing),
                    MissingRowPolicy::Upsert => {
                        let row = self.bounded(store.upsert(key, value)).await?;
                        Ok(FoldOutcome::Inserted(row))
                    }
                }
            }
            FoldMode::ReadModifyWrite => {
                if let Some(existing) = self.bounded(store.fetch(key)).await? {
                    let row = existing.fold(value);
                    if self.bounded(store.write(key, &row)).await? {
                        return Ok(FoldOutcome::Folded(row));
                    }
                    // Row vanished between the lookup and the update
                    debug!("Row for {} disappeared before update", key);
                }
                match self.settings.missing_row {
                    MissingRowPolicy::Skip => Ok(FoldOutcome::Missing),
                    MissingRowPolicy::Upsert => {
                        let row = AggregateRow::first(value);
                        self.bounded(store.insert(key, &row)).await?;
                        Ok(FoldOutcome::Inserted(row))
                    }
                }
            }
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.settings.store_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| AggregatorError::Timeout(limit))?
    }
}

fn record_drop(dropped: &DroppedEvent) {
    let label = dropped.reason.label();
    metrics::DROPPED_EVENTS.with_label_values(&[label]).inc();
    audit::dropped_event(
        dropped.index,
        dropped.key.as_ref(),
        label,
        &dropped.reason.to_string(),
    );
}

fn record_batch(report: &BatchReport) {
    let outcomes = [
        ("folded", report.folded),
        ("inserted", report.inserted),
        ("ignored", report.ignored),
        ("dropped", report.dropped.len()),
        ("unprocessed", report.unprocessed),
    ];
    for (outcome, count) in outcomes {
        if count > 0 {
            metrics::EVENTS_TOTAL
                .with_label_values(&[outcome])
                .inc_by(count as f64);
        }
    }
    let status = if report.aborted {
        "aborted"
    } else if report.dropped.is_empty() {
        "ok"
    } else {
        "partial"
    };
    metrics::BATCHES_TOTAL.with_label_values(&[status]).inc();
}
