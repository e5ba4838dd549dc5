//! Probe and metrics endpoints.
//!
//! - `GET /healthz` - liveness, always OK while the process serves requests
//! - `GET /readyz` - OK once caches are synced and workers are running
//! - `GET /metrics` - Prometheus text format

use crate::address_index::AddressIndex;
use crate::metrics::Metrics;
use crate::workqueue::WorkQueue;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProbeState {
    pub metrics: Metrics,
    pub ready: Arc<AtomicBool>,
    pub queue: WorkQueue,
    pub index: Arc<AddressIndex>,
}

pub fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "OK"
}

async fn readyz(State(state): State<ProbeState>) -> Result<&'static str, StatusCode> {
    if state.ready.load(Ordering::Acquire) {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn metrics(State(state): State<ProbeState>) -> Result<String, StatusCode> {
    // Gauges are sampled at scrape time
    state.metrics.set_queue_depth(state.queue.len());
    state.metrics.set_address_index_entries(state.index.len());

    state.metrics.render().map_err(|e| {
        warn!("Failed to render metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Serves the probe endpoints until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: ProbeState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Probe server listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
