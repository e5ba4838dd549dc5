//! Controller-specific error types.
//!
//! This module defines error types specific to the Node Link Controller
//! that are not covered by upstream library errors. Every variant raised
//! while syncing a single Node is retryable; only startup errors end the
//! process.

use thiserror::Error;
use kube::Error as KubeError;

/// Errors that can occur in the Node Link Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Queue key or linkage annotation that does not split into `[namespace/]name`
    #[error("unexpected key format: {0:?}")]
    MalformedKey(String),

    /// Node reports no InternalIP address
    #[error("unable to find InternalIP for node: {0:?}")]
    MissingInternalIp(String),

    /// Neither the linkage annotation nor the address index yielded a Machine
    #[error("no machine was found for node: {0:?}")]
    NoMachineFound(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caches did not finish their initial list in time
    #[error("unable to sync caches for {0} controller")]
    CacheSync(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe/metrics HTTP server failed
    #[error("Probe server error: {0}")]
    Server(#[from] std::io::Error),
}
