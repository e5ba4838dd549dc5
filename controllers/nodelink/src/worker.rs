//! Worker pool draining the Node work queue.
//!
//! Each worker loops: take a key, sync it, then `forget` it on success or
//! `requeue` it on failure, and always mark it `done`. The queue guarantees
//! a key is held by at most one worker; different keys sync in parallel.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, SyncOutcome};
use crate::workqueue::{RequeueOutcome, WorkQueue};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// What happened to one key taken from the queue.
#[derive(Debug)]
pub enum ItemResult {
    Succeeded(SyncOutcome),
    Failed {
        error: ControllerError,
        requeue: RequeueOutcome,
    },
}

/// Shared state of the worker loops.
#[derive(Debug)]
pub struct WorkerPool {
    queue: WorkQueue,
    reconciler: Arc<Reconciler>,
    metrics: Metrics,
}

impl WorkerPool {
    pub fn new(queue: WorkQueue, reconciler: Arc<Reconciler>, metrics: Metrics) -> Self {
        Self {
            queue,
            reconciler,
            metrics,
        }
    }

    /// Processes one key. Returns `None` once the queue is shut down.
    pub async fn process_next_work_item(&self) -> Option<(String, ItemResult)> {
        let key = self.queue.get().await?;
        let start = Instant::now();

        let result = AssertUnwindSafe(self.reconciler.sync_node(&key))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(ControllerError::Reconciliation(format!("sync of node {key} panicked")))
            });

        let item = self.handle_result(&key, result, start.elapsed().as_secs_f64());
        self.queue.done(&key);
        self.metrics.set_queue_depth(self.queue.len());
        Some((key, item))
    }

    fn handle_result(&self, key: &str, result: Result<SyncOutcome, ControllerError>, seconds: f64) -> ItemResult {
        match result {
            Ok(outcome) => {
                self.queue.forget(key);
                self.metrics.observe_reconcile(outcome.as_str(), seconds);
                ItemResult::Succeeded(outcome)
            }
            Err(error) => {
                self.metrics.observe_reconcile("error", seconds);
                let requeue = self.queue.requeue(key);
                match requeue {
                    RequeueOutcome::Requeued { attempt, delay } => {
                        info!("Error syncing node {} (retry {} in {:?}): {}", key, attempt, delay, error);
                        self.metrics.inc_requeue();
                    }
                    RequeueOutcome::Dropped { attempts } => {
                        error!("Dropping node {:?} out of the queue after {} retries: {}", key, attempts, error);
                        self.metrics.inc_dropped();
                    }
                }
                ItemResult::Failed { error, requeue }
            }
        }
    }

    /// Runs one worker loop until the queue shuts down.
    pub async fn worker(&self) {
        while let Some((key, item)) = self.process_next_work_item().await {
            if let ItemResult::Succeeded(outcome) = item {
                debug!("Synced node {}: {}", key, outcome.as_str());
            }
        }
    }

    /// Spawns `workers` worker loops.
    pub fn spawn(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|id| {
                let pool = Arc::clone(self);
                tokio::spawn(async move {
                    debug!("Worker {} started", id);
                    pool.worker().await;
                    debug!("Worker {} stopped", id);
                })
            })
            .collect()
    }
}
