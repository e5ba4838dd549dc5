//! Prometheus metrics for the node-link controller.
//!
//! Metrics tracked:
//! - `nodelink_reconcile_total{result}` - sync attempts by outcome
//! - `nodelink_reconcile_duration_seconds` - sync latency
//! - `nodelink_requeue_total` - keys put back with backoff
//! - `nodelink_dropped_total` - keys dropped after exhausting retries
//! - `nodelink_queue_depth` - keys waiting for a worker
//! - `nodelink_address_index_entries` - InternalIP → Machine entries

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Registry plus handles to every collector.
///
/// Cloning shares the underlying collectors.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration: Histogram,
    requeue_total: IntCounter,
    dropped_total: IntCounter,
    queue_depth: IntGauge,
    address_index_entries: IntGauge,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("nodelink".to_string()), None)?;

        let reconcile_total = IntCounterVec::new(
            Opts::new("reconcile_total", "Node sync attempts grouped by result"),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(HistogramOpts::new(
            "reconcile_duration_seconds",
            "Duration of a single Node sync in seconds",
        ))?;
        let requeue_total = IntCounter::new("requeue_total", "Node keys requeued with backoff")?;
        let dropped_total = IntCounter::new(
            "dropped_total",
            "Node keys dropped out of the queue after exhausting retries",
        )?;
        let queue_depth = IntGauge::new("queue_depth", "Node keys waiting for a worker")?;
        let address_index_entries = IntGauge::new(
            "address_index_entries",
            "InternalIP to Machine entries in the address index",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(requeue_total.clone()))?;
        registry.register(Box::new(dropped_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(address_index_entries.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            requeue_total,
            dropped_total,
            queue_depth,
            address_index_entries,
        })
    }

    pub fn observe_reconcile(&self, result: &str, seconds: f64) {
        self.reconcile_total.with_label_values(&[result]).inc();
        self.reconcile_duration.observe(seconds);
    }

    pub fn inc_requeue(&self) {
        self.requeue_total.inc();
    }

    pub fn inc_dropped(&self) {
        self.dropped_total.inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub fn set_address_index_entries(&self, entries: usize) {
        self.address_index_entries.set(i64::try_from(entries).unwrap_or(i64::MAX));
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
impl Metrics {
    pub fn reconcile_count(&self, result: &str) -> u64 {
        self.reconcile_total.with_label_values(&[result]).get()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_total.get()
    }

    pub fn requeue_count(&self) -> u64 {
        self.requeue_total.get()
    }
}
