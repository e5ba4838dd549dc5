//! Event subscribers for the Node and Machine watch feeds.
//!
//! Node events only enqueue the Node key; all real work happens in the
//! reconciler. Machine events keep the address index current.

use crate::address_index::AddressIndex;
use crate::keys::object_key;
use crate::workqueue::WorkQueue;
use crds::Machine;
use k8s_openapi::api::core::v1::Node;
use std::sync::Arc;
use tracing::{debug, warn};

/// Subscription interface fed by an informer.
///
/// Delivery is at-least-once and the two feeds are not ordered relative to
/// each other.
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &Arc<K>);
    fn on_update(&self, old: &Arc<K>, new: &Arc<K>);
    fn on_delete(&self, obj: &Arc<K>);
}

/// Enqueues the key of every Node it hears about.
#[derive(Debug, Clone)]
pub struct NodeEventHandler {
    queue: WorkQueue,
}

impl NodeEventHandler {
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }

    fn enqueue(&self, node: &Node) {
        match object_key(node) {
            Some(key) => self.queue.add(key),
            None => warn!("Couldn't get key for node {:?}", node.metadata),
        }
    }
}

impl EventHandler<Node> for NodeEventHandler {
    fn on_add(&self, obj: &Arc<Node>) {
        debug!("Adding node: {:?}", obj.metadata.name);
        self.enqueue(obj);
    }

    fn on_update(&self, _old: &Arc<Node>, new: &Arc<Node>) {
        debug!("Updating node: {:?}", new.metadata.name);
        self.enqueue(new);
    }

    fn on_delete(&self, obj: &Arc<Node>) {
        debug!("Deleting node: {:?}", obj.metadata.name);
        self.enqueue(obj);
    }
}

/// Maintains the InternalIP → Machine index.
#[derive(Debug, Clone)]
pub struct MachineEventHandler {
    index: Arc<AddressIndex>,
}

impl MachineEventHandler {
    pub fn new(index: Arc<AddressIndex>) -> Self {
        Self { index }
    }

    fn index_machine(&self, machine: &Arc<Machine>) {
        if let Some(ip) = machine.internal_ip() {
            self.index.put(ip, Arc::clone(machine));
        }
    }
}

impl EventHandler<Machine> for MachineEventHandler {
    fn on_add(&self, obj: &Arc<Machine>) {
        debug!("Adding machine {:?} into machine address list", obj.metadata.name);
        self.index_machine(obj);
    }

    fn on_update(&self, _old: &Arc<Machine>, new: &Arc<Machine>) {
        // The old address is left in place when the InternalIP changes
        debug!("Updating machine {:?} in machine address list", new.metadata.name);
        self.index_machine(new);
    }

    fn on_delete(&self, obj: &Arc<Machine>) {
        if let Some(ip) = obj.internal_ip() {
            self.index.remove(ip);
        }
        debug!("Deleted machine {:?} from machine address list", obj.metadata.name);
    }
}
