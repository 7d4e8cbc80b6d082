//! Prometheus metrics for the aggregator service

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

// ── Fold metrics ─────────────────────────────────────────────────────────────

/// Events by outcome: folded, inserted, ignored, dropped, unprocessed
pub static EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "loadfold_events_total",
        "Change events handled, by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Dropped events by reason: missing_row, invalid_event, query_failure, timeout
pub static DROPPED_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "loadfold_dropped_events_total",
        "Events dropped without being folded, by reason",
        &["reason"]
    )
    .unwrap()
});

pub static BATCHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "loadfold_batches_total",
        "Batches processed, by status",
        &["status"]
    )
    .unwrap()
});

pub static FOLD_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "loadfold_fold_duration_seconds",
        "Row-store latency of a single fold",
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap()
});

// ── Worker metrics ───────────────────────────────────────────────────────────

pub static ACTIVE_WORKERS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "loadfold_active_workers",
        "Workers currently holding a row-store connection"
    )
    .unwrap()
});

pub static CONNECTION_FAILURES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "loadfold_connection_failures_total",
        "Row-store connections that could not be acquired"
    )
    .unwrap()
});

// ── Feed metrics ─────────────────────────────────────────────────────────────

pub static FEED_MALFORMED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "loadfold_feed_malformed_total",
        "Feed lines that could not be decoded"
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!("Metrics encoding failed: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
