//! Process configuration.
//!
//! Every setting is a command-line flag with an environment variable
//! fallback. Kubernetes credentials are not configured here; the client is
//! built from the in-cluster service account or the local kubeconfig.

use crate::error::ControllerError;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "nodelink-controller", version, about = "Links Nodes to their Machines")]
pub struct Config {
    #[arg(
        long,
        env = "NODELINK_WORKERS",
        default_value_t = 1,
        help = "Number of Node keys synced in parallel"
    )]
    pub workers: usize,

    #[arg(
        long,
        env = "NODELINK_MAX_RETRIES",
        default_value_t = crate::workqueue::DEFAULT_MAX_RETRIES,
        help = "Retries before a failing Node key is dropped out of the queue"
    )]
    pub max_retries: u32,

    #[arg(
        long,
        env = "NODELINK_BASE_BACKOFF_MS",
        default_value_t = 5,
        help = "Delay before the first retry of a Node key, doubled on every further retry"
    )]
    pub base_backoff_ms: u64,

    #[arg(
        long,
        env = "NODELINK_MAX_BACKOFF_SECS",
        default_value_t = 1000,
        help = "Upper bound on the delay between retries"
    )]
    pub max_backoff_secs: u64,

    #[arg(
        long,
        env = "NODELINK_CACHE_SYNC_TIMEOUT_SECS",
        default_value_t = 120,
        help = "How long to wait for the Node and Machine caches to fill before giving up"
    )]
    pub cache_sync_timeout_secs: u64,

    #[arg(
        long,
        env = "NODELINK_RESYNC_PERIOD_SECS",
        default_value_t = 5,
        help = "Interval at which every cached Node and Machine is redelivered to its handler (0 disables)"
    )]
    pub resync_period_secs: u64,

    #[arg(
        long,
        env = "WATCH_NAMESPACE",
        help = "Namespace to watch Machines in (all namespaces when unset)"
    )]
    pub machine_namespace: Option<String>,

    #[arg(
        long,
        env = "NODELINK_PROBE_ADDR",
        default_value = "0.0.0.0:8080",
        help = "Listen address for /healthz, /readyz and /metrics"
    )]
    pub probe_addr: SocketAddr,
}

impl Config {
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.max_retries == 0 {
            return Err(ControllerError::InvalidConfig("max-retries must be at least 1".to_string()));
        }
        if self.base_backoff_ms == 0 {
            return Err(ControllerError::InvalidConfig("base-backoff-ms must be greater than 0".to_string()));
        }
        if self.max_backoff_secs.saturating_mul(1000) < self.base_backoff_ms {
            return Err(ControllerError::InvalidConfig(
                "max-backoff-secs must not be shorter than base-backoff-ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }

    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_period_secs > 0).then(|| Duration::from_secs(self.resync_period_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["nodelink-controller"]).unwrap();
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_retries, 15);
        assert_eq!(config.base_backoff(), Duration::from_millis(5));
        assert_eq!(config.max_backoff(), Duration::from_secs(1000));
        assert_eq!(config.resync_period(), Some(Duration::from_secs(5)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "nodelink-controller",
            "--workers",
            "4",
            "--machine-namespace",
            "openshift-machine-api",
        ])
        .unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.machine_namespace.as_deref(), Some("openshift-machine-api"));
    }

    #[test]
    fn test_zero_resync_period_disables_resync() {
        let config = Config::try_parse_from(["nodelink-controller", "--resync-period-secs", "0"]).unwrap();
        assert_eq!(config.resync_period(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let config = Config::try_parse_from(["nodelink-controller", "--workers", "0"]).unwrap();
        assert!(matches!(config.validate(), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_backoff_is_rejected() {
        let config = Config::try_parse_from(["nodelink-controller", "--base-backoff-ms", "0"]).unwrap();
        assert!(matches!(config.validate(), Err(ControllerError::InvalidConfig(_))));
    }
}
