//! Deduplicating, rate-limited work queue of Node keys.
//!
//! Semantics follow the usual controller work queue:
//! - a key is queued at most once while pending; re-adds coalesce
//! - a key handed out by [`WorkQueue::get`] is "processing" until
//!   [`WorkQueue::done`]; adding it meanwhile defers the re-add until `done`,
//!   so a key is never processed by two workers at the same time
//! - failures are retried with per-key exponential backoff up to a fixed
//!   number of attempts, after which the key is dropped

use crate::backoff::ItemExponentialBackoff;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Number of retries before a key is dropped out of the queue.
pub const DEFAULT_MAX_RETRIES: u32 = 15;

/// Result of [`WorkQueue::requeue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// The key will be re-added after `delay`; this is retry number `attempt`
    Requeued { attempt: u32, delay: Duration },
    /// The retry budget is spent; the key was forgotten and not re-added
    Dropped { attempts: u32 },
}

#[derive(Debug)]
struct QueueState {
    /// Keys waiting to be handed to a worker, in FIFO order
    queue: VecDeque<String>,
    /// Keys that need processing (queued, or re-added while processing)
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    backoff: ItemExponentialBackoff,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    max_retries: u32,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // State stays consistent across a panic: every mutation is a single set/deque op
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to the queue; clones refer to the same queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    /// Creates a queue that retries a key at most `max_retries` times.
    #[must_use]
    pub fn new(max_retries: u32, backoff: ItemExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    backoff,
                    shutting_down: false,
                }),
                notify: Notify::new(),
                max_retries,
            }),
        }
    }

    /// Marks `key` as needing processing. Ignored once the queue is shut down.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.inner.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Re-queued by done()
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Adds `key` once `delay` has elapsed.
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Records a failure for `key` and adds it back after its backoff delay.
    pub fn add_rate_limited(&self, key: &str) -> Duration {
        let delay = self.inner.lock().backoff.when(key);
        self.add_after(key, delay);
        delay
    }

    /// Re-adds a failed key with backoff, or drops it once the retry budget is spent.
    pub fn requeue(&self, key: &str) -> RequeueOutcome {
        let attempts = self.num_requeues(key);
        if attempts < self.inner.max_retries {
            let delay = self.add_rate_limited(key);
            RequeueOutcome::Requeued { attempt: attempts + 1, delay }
        } else {
            self.forget(key);
            RequeueOutcome::Dropped { attempts }
        }
    }

    /// Blocks until a key is available. Returns `None` once the queue is shut down.
    ///
    /// Every key returned must be released with [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add/shutdown is not missed
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Releases a key handed out by [`WorkQueue::get`].
    pub fn done(&self, key: &str) {
        let mut state = self.inner.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            debug!("Key {} was re-added while processing, queueing it again", key);
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clears the retry history of `key`.
    pub fn forget(&self, key: &str) {
        self.inner.lock().backoff.forget(key);
    }

    /// Number of times `key` has been requeued since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.lock().backoff.num_requeues(key)
    }

    /// Number of keys waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the queue: waiting and future `get` calls return `None`, adds are ignored.
    pub fn shutdown(&self) {
        self.inner.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, ItemExponentialBackoff::default())
    }
}
