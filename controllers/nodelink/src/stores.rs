//! Narrow seams between the reconciler and the cluster.
//!
//! The reconciler only needs to look a Node or Machine up in a read-only
//! cache and to replace a Node. Production wires these to kube reflector
//! stores and `Api<Node>`; tests use in-memory fakes.

use crate::error::ControllerError;
use crds::Machine;
use k8s_openapi::api::core::v1::Node;
use kube::api::PostParams;
use kube::{Api, ResourceExt};
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;

/// Read-only lookup of Nodes by name.
pub trait NodeStore: Send + Sync {
    /// Returns `Ok(None)` when the Node is not in the cache.
    fn get_node(&self, name: &str) -> Result<Option<Arc<Node>>, ControllerError>;
}

/// Read-only lookup of Machines by namespace and name.
pub trait MachineStore: Send + Sync {
    /// Returns `Ok(None)` when the Machine is not in the cache.
    fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Arc<Machine>>, ControllerError>;
}

/// Persists a modified Node with full-object replace semantics.
#[async_trait::async_trait]
pub trait NodeUpdater: Send + Sync {
    async fn update_node(&self, node: &Node) -> Result<Node, ControllerError>;
}

impl NodeStore for Store<Node> {
    fn get_node(&self, name: &str) -> Result<Option<Arc<Node>>, ControllerError> {
        Ok(self.get(&ObjectRef::new(name)))
    }
}

impl MachineStore for Store<Machine> {
    fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Arc<Machine>>, ControllerError> {
        Ok(self.get(&ObjectRef::new(name).within(namespace)))
    }
}

#[async_trait::async_trait]
impl NodeUpdater for Api<Node> {
    async fn update_node(&self, node: &Node) -> Result<Node, ControllerError> {
        let updated = self.replace(&node.name_any(), &PostParams::default(), node).await?;
        Ok(updated)
    }
}
