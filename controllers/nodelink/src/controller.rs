//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the informers,
//! address index, work queue, reconciler and workers together, and owns the
//! process lifecycle: cache warm-up before workers start, and a graceful
//! drain when SIGINT or SIGTERM arrives.

use crate::address_index::AddressIndex;
use crate::backoff::ItemExponentialBackoff;
use crate::config::Config;
use crate::error::ControllerError;
use crate::handlers::{MachineEventHandler, NodeEventHandler};
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::server::{self, ProbeState};
use crate::watcher::Informer;
use crate::worker::WorkerPool;
use crate::workqueue::WorkQueue;
use crds::Machine;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, Resource};
use kube_runtime::reflector::Store;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

/// Main controller for Node ↔ Machine linking.
pub struct Controller {
    config: Config,
    queue: WorkQueue,
    index: Arc<AddressIndex>,
    metrics: Metrics,
    ready: Arc<AtomicBool>,
    node_store: Store<Node>,
    machine_store: Store<Machine>,
    pool: Arc<WorkerPool>,
    node_informer: JoinHandle<Result<(), ControllerError>>,
    machine_informer: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its informers.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Node Link Controller");

        let kube_client = Client::try_default().await?;

        let node_api: Api<Node> = Api::all(kube_client.clone());
        let machine_api: Api<Machine> = match config.machine_namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client),
        };

        let queue = WorkQueue::new(
            config.max_retries,
            ItemExponentialBackoff::new(config.base_backoff(), config.max_backoff()),
        );
        let index = Arc::new(AddressIndex::new());
        let metrics = Metrics::new()?;

        let node_informer = Informer::new(
            node_api.clone(),
            Arc::new(NodeEventHandler::new(queue.clone())),
            "Node",
            config.resync_period(),
        );
        let machine_informer = Informer::new(
            machine_api,
            Arc::new(MachineEventHandler::new(Arc::clone(&index))),
            "Machine",
            config.resync_period(),
        );
        let node_store = node_informer.store();
        let machine_store = machine_informer.store();

        let reconciler = Reconciler::new(
            Arc::new(node_store.clone()),
            Arc::new(machine_store.clone()),
            Arc::clone(&index),
            Arc::new(node_api),
        );
        let pool = Arc::new(WorkerPool::new(queue.clone(), Arc::new(reconciler), metrics.clone()));

        // Machines first so the address index is warm when Node events arrive
        let machine_informer = tokio::spawn(machine_informer.run());
        let node_informer = tokio::spawn(node_informer.run());

        Ok(Self {
            config,
            queue,
            index,
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
            node_store,
            machine_store,
            pool,
            node_informer,
            machine_informer,
        })
    }

    /// Runs the controller until a shutdown signal arrives or an informer dies.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Starting nodelink controller");

        let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
        let probe_state = ProbeState {
            metrics: self.metrics.clone(),
            ready: Arc::clone(&self.ready),
            queue: self.queue.clone(),
            index: Arc::clone(&self.index),
        };
        let probe_server = tokio::spawn(server::serve(self.config.probe_addr, probe_state, async move {
            let _ = stop_rx.changed().await;
        }));

        let timeout = self.config.cache_sync_timeout();
        wait_for_cache_sync("machine", &self.machine_store, timeout).await?;
        wait_for_cache_sync("node", &self.node_store, timeout).await?;

        let workers = self.pool.spawn(self.config.workers);
        self.ready.store(true, Ordering::Release);
        info!("Started {} workers", self.config.workers);

        let result = tokio::select! {
            () = shutdown_signal() => {
                info!("Shutdown signal received");
                Ok(())
            }
            result = &mut self.node_informer => Err(informer_exit("Node", result)),
            result = &mut self.machine_informer => Err(informer_exit("Machine", result)),
        };

        info!("Shutting down nodelink controller");
        self.ready.store(false, Ordering::Release);
        self.queue.shutdown();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker task failed: {}", e);
            }
        }
        self.node_informer.abort();
        self.machine_informer.abort();

        let _ = stop_tx.send(true);
        match probe_server.await {
            Ok(Err(e)) => error!("Probe server error: {}", e),
            Err(e) => error!("Probe server task failed: {}", e),
            Ok(Ok(())) => {}
        }

        info!("Nodelink controller stopped");
        result
    }
}

/// Waits for a cache to finish its initial list.
async fn wait_for_cache_sync<K>(
    controller_name: &str,
    store: &Store<K>,
    timeout: Duration,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    info!("Waiting for caches to sync for {} controller", controller_name);

    match tokio::time::timeout(timeout, store.wait_until_ready()).await {
        Ok(Ok(())) => {
            info!("Caches are synced for {} controller", controller_name);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Cache writer for {} controller went away: {}", controller_name, e);
            Err(ControllerError::CacheSync(controller_name.to_string()))
        }
        Err(_) => {
            error!("Timed out after {:?} waiting for {} caches", timeout, controller_name);
            Err(ControllerError::CacheSync(controller_name.to_string()))
        }
    }
}

fn informer_exit(
    resource_name: &str,
    result: Result<Result<(), ControllerError>, JoinError>,
) -> ControllerError {
    match result {
        Ok(Err(e)) => e,
        Ok(Ok(())) => ControllerError::Watch(format!("{resource_name} informer exited")),
        Err(e) => ControllerError::Watch(format!("{resource_name} informer panicked: {e}")),
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_node;
    use kube_runtime::{reflector, watcher};

    #[tokio::test]
    async fn test_cache_sync_times_out_without_initial_list() {
        let (store, _writer) = reflector::store::<Node>();

        let result = wait_for_cache_sync("node", &store, Duration::from_millis(20)).await;

        assert!(matches!(result, Err(ControllerError::CacheSync(ref name)) if name == "node"));
    }

    #[tokio::test]
    async fn test_cache_sync_completes_after_initial_list() {
        let (store, mut writer) = reflector::store::<Node>();
        writer.apply_watcher_event(&watcher::Event::Init);
        writer.apply_watcher_event(&watcher::Event::InitApply(create_test_node("node-1", None, None)));
        writer.apply_watcher_event(&watcher::Event::InitDone);

        wait_for_cache_sync("node", &store, Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.state().len(), 1);
    }

    #[test]
    fn test_informer_exit_is_an_error() {
        let err = informer_exit("Node", Ok(Ok(())));
        assert!(matches!(err, ControllerError::Watch(ref m) if m == "Node informer exited"));
    }
}
