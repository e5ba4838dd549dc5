//! Node Link Controller
//!
//! Links every Kubernetes Node to the Machine that backs it:
//! - Finds the Machine through the `machine.openshift.io/machine` annotation,
//!   or by the Node's InternalIP when the annotation is missing or stale
//! - Copies the Machine's labels onto the Node
//! - Adds the Machine's taints to the Node without removing any
//!
//! Node keys flow through a deduplicating, rate-limited work queue drained by
//! a pool of workers; a failing key is retried with exponential backoff and
//! dropped after a bounded number of attempts.

mod address_index;
mod backoff;
mod config;
mod controller;
mod error;
mod handlers;
mod keys;
mod metrics;
mod reconciler;
mod server;
mod stores;
mod watcher;
mod worker;
mod workqueue;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls client needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::parse();
    config.validate()?;

    info!("Starting Node Link Controller");
    info!("Configuration:");
    info!("  Workers: {}", config.workers);
    info!("  Max retries: {}", config.max_retries);
    info!(
        "  Machine namespace: {}",
        config.machine_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
