//! JSON-lines feed reader
//!
//! Reads one `EventBatch` per line and hands batches to the listener, keeping
//! at most `max_in_flight` of them outstanding. Malformed lines are logged,
//! counted and skipped.

use crate::listener::AggregationListener;
use crate::metrics;
use anyhow::{Context, Result};
use loadfold_shared::protocol::wire::EventBatch;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Totals for one feed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub batches: u64,
    pub events: u64,
    pub malformed_lines: u64,
    /// Batches the listener reported as not handled (strict policy) or failed to accept
    pub rejected_batches: u64,
}

/// Drive `listener` from `reader` until EOF or cancellation, then wait for
/// in-flight batches to finish.
pub async fn run<R>(
    reader: R,
    listener: Arc<AggregationListener>,
    max_in_flight: usize,
    cancel: CancellationToken,
) -> Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut tasks: JoinSet<bool> = JoinSet::new();
    let mut stats = FeedStats::default();
    let mut line_no = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Feed cancelled after {} lines", line_no);
                break;
            }
            line = lines.next_line() => line.context("Read feed line")?,
        };
        let Some(line) = line else {
            debug!("Feed reached EOF after {} lines", line_no);
            break;
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let batch = match EventBatch::from_json_line(&line) {
            Ok(batch) => batch,
            Err(e) => {
                metrics::FEED_MALFORMED.inc();
                stats.malformed_lines += 1;
                warn!("Skipping malformed feed line {}: {:#}", line_no, e);
                continue;
            }
        };
        stats.batches += 1;
        stats.events += batch.events.len() as u64;

        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .context("Feed semaphore closed")?;
        let listener = listener.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let sequence = batch.sequence;
            match listener.process_events(batch.events).await {
                Ok(handled) => handled,
                Err(e) => {
                    warn!("Batch {} not processed: {}", sequence, e);
                    false
                }
            }
        });

        // Reap finished batches so the set does not grow with the feed.
        while let Some(done) = tasks.try_join_next() {
            count_result(done, &mut stats);
        }
    }

    while let Some(done) = tasks.join_next().await {
        count_result(done, &mut stats);
    }
    Ok(stats)
}

fn count_result(done: Result<bool, tokio::task::JoinError>, stats: &mut FeedStats) {
    match done {
        Ok(true) => {}
        Ok(false) => stats.rejected_batches += 1,
        Err(e) => {
            warn!("Batch task failed: {}", e);
            stats.rejected_batches += 1;
        }
    }
}
