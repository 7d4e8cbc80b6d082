//! Worker pool
//!
//! Every worker owns exactly one row-store connection, acquired when the pool
//! starts and released when the worker exits. Batches are handed out
//! round-robin over bounded queues; callers await the per-batch report.

use crate::audit;
use crate::error::{AggregatorError, Result};
use crate::fold::{Aggregator, BatchReport};
use crate::metrics;
use crate::storage::{RowStore, StoreConnector};
use loadfold_shared::types::events::ChangeEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct Job {
    events: Vec<ChangeEvent>,
    reply: oneshot::Sender<BatchReport>,
}

pub struct WorkerPool {
    senders: Vec<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Acquire `workers` connections and spawn one worker per connection.
    ///
    /// If any connection cannot be acquired, the ones already open are closed
    /// and `ConnectionFailure` is returned.
    pub async fn start(
        connector: Arc<dyn StoreConnector>,
        aggregator: Arc<Aggregator>,
        workers: usize,
        queue_depth: usize,
    ) -> Result<Self> {
        if workers == 0 || queue_depth == 0 {
            return Err(AggregatorError::InvalidConfig(
                "workers and queue_depth must be greater than 0".to_string(),
            ));
        }

        let mut connections: Vec<Box<dyn RowStore>> = Vec::with_capacity(workers);
        for id in 0..workers {
            match connector.connect().await {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    metrics::CONNECTION_FAILURES.inc();
                    warn!(
                        "Worker {} could not connect to {}: {}",
                        id,
                        connector.describe(),
                        e
                    );
                    for mut conn in connections {
                        if let Err(close_err) = conn.close().await {
                            warn!("Closing connection after failed start: {}", close_err);
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for (id, conn) in connections.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(queue_depth);
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(id, conn, aggregator.clone(), rx)));
        }

        info!(
            "Started {} workers against {}",
            workers,
            connector.describe()
        );
        Ok(Self {
            senders,
            handles,
            next: AtomicUsize::new(0),
        })
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Hand a batch to the next worker and wait for its report.
    pub async fn submit(&self, events: Vec<ChangeEvent>) -> Result<BatchReport> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        let (reply, response) = oneshot::channel();
        self.senders[idx]
            .send(Job { events, reply })
            .await
            .map_err(|_| AggregatorError::NotStarted)?;
        response.await.map_err(|_| AggregatorError::NotStarted)
    }

    /// Stop accepting batches, let workers drain their queues, and wait until
    /// every worker has released its connection.
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    id: usize,
    mut conn: Box<dyn RowStore>,
    aggregator: Arc<Aggregator>,
    mut jobs: mpsc::Receiver<Job>,
) {
    metrics::ACTIVE_WORKERS.inc();
    audit::worker_connection(id, "acquired");

    while let Some(job) = jobs.recv().await {
        let report = aggregator.apply(conn.as_mut(), &job.events).await;
        // The submitter may have gone away; the batch was still applied.
        let _ = job.reply.send(report);
    }

    if let Err(e) = conn.close().await {
        warn!("Worker {} failed to close its connection: {}", id, e);
    }
    audit::worker_connection(id, "released");
    metrics::ACTIVE_WORKERS.dec();
}
