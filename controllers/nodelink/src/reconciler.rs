//! Reconciliation logic linking Nodes to Machines.
//!
//! For one Node key the reconciler:
//! 1. resolves the Node from the Node cache (gone → nothing to do)
//! 2. finds its Machine: linkage annotation first, InternalIP index second
//! 3. builds the desired Node: linkage annotation, Machine labels, Machine taints
//! 4. replaces the Node only if the desired copy differs from the cached one

use crate::address_index::AddressIndex;
use crate::error::ControllerError;
use crate::keys::split_object_key;
use crate::stores::{MachineStore, NodeStore, NodeUpdater};
use crds::{ADDRESS_TYPE_INTERNAL_IP, Machine};
use k8s_openapi::api::core::v1::{Node, Taint};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Annotation storing the link between a Node and its Machine, as `namespace/name`.
pub const MACHINE_ANNOTATION_KEY: &str = "machine.openshift.io/machine";

/// Successful end states of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The Node is no longer in the cache
    NodeDeleted,
    /// The Node already matched its Machine; no update was issued
    Unchanged,
    /// The Node was replaced with the linked copy
    Updated,
}

impl SyncOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOutcome::NodeDeleted => "node_deleted",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Updated => "updated",
        }
    }
}

/// Links Nodes to Machines and propagates Machine labels and taints.
pub struct Reconciler {
    nodes: Arc<dyn NodeStore>,
    machines: Arc<dyn MachineStore>,
    index: Arc<AddressIndex>,
    updater: Arc<dyn NodeUpdater>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        machines: Arc<dyn MachineStore>,
        index: Arc<AddressIndex>,
        updater: Arc<dyn NodeUpdater>,
    ) -> Self {
        Self {
            nodes,
            machines,
            index,
            updater,
        }
    }

    /// Syncs the Node with the given key.
    ///
    /// Not meant to be invoked concurrently with the same key.
    pub async fn sync_node(&self, key: &str) -> Result<SyncOutcome, ControllerError> {
        let start = Instant::now();
        debug!("Syncing node {}", key);

        let (_, name) = split_object_key(key)?;
        let Some(node) = self.nodes.get_node(name)? else {
            info!("Node {} has been deleted, nothing to sync", key);
            return Ok(SyncOutcome::NodeDeleted);
        };

        let result = self.process_node(&node).await;
        debug!("Finished syncing node {}, duration: {:?}", key, start.elapsed());
        result
    }

    async fn process_node(&self, node: &Node) -> Result<SyncOutcome, ControllerError> {
        let machine = self.find_machine(node)?;
        debug!(
            "Found machine {}/{} for node {}",
            machine.namespace().unwrap_or_default(),
            machine.name_any(),
            node.name_any()
        );

        let desired = link_node(node, &machine);
        if desired == *node {
            return Ok(SyncOutcome::Unchanged);
        }

        debug!("Node {} has changed, updating", node.name_any());
        if let Err(e) = self.updater.update_node(&desired).await {
            error!("Error updating node {}: {}", node.name_any(), e);
            return Err(e);
        }
        Ok(SyncOutcome::Updated)
    }

    /// Finds the Machine backing `node`.
    ///
    /// A well-formed annotation naming a Machine that no longer exists falls
    /// through to the InternalIP lookup; a malformed one is an error.
    pub fn find_machine(&self, node: &Node) -> Result<Arc<Machine>, ControllerError> {
        let node_name = node.name_any();

        if let Some(machine_key) = node.annotations().get(MACHINE_ANNOTATION_KEY) {
            let (namespace, name) = split_object_key(machine_key).inspect_err(|e| {
                info!("Error processing node {}. Machine annotation format is incorrect: {}", node_name, e);
            })?;
            match self.machines.get_machine(namespace, name)? {
                Some(machine) => return Ok(machine),
                None => warn!(
                    "Machine {} associated to node {} has been deleted, will attempt to find new machine by IP",
                    machine_key, node_name
                ),
            }
        }

        let Some(ip) = node_internal_ip(node) else {
            warn!("Unable to find InternalIP for node {}", node_name);
            return Err(ControllerError::MissingInternalIp(node_name));
        };

        debug!("Searching machine cache for IP match for node {}", node_name);
        self.index
            .get(ip)
            .ok_or(ControllerError::NoMachineFound(node_name))
    }
}

/// First `InternalIP` reported in the Node status.
pub fn node_internal_ip(node: &Node) -> Option<&str> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == ADDRESS_TYPE_INTERNAL_IP)
        .map(|a| a.address.as_str())
}

/// Returns a copy of `node` linked to `machine`.
///
/// Sets the linkage annotation, copies every Machine label over the Node's
/// (Machine wins), and adds the Machine taints the Node lacks.
pub fn link_node(node: &Node, machine: &Machine) -> Node {
    let mut desired = node.clone();

    desired
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            MACHINE_ANNOTATION_KEY.to_string(),
            format!("{}/{}", machine.namespace().unwrap_or_default(), machine.name_any()),
        );

    if !machine.spec.metadata.labels.is_empty() {
        let labels = desired.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (key, value) in &machine.spec.metadata.labels {
            debug!("Copying label {} = {}", key, value);
            labels.insert(key.clone(), value.clone());
        }
    }

    add_taints_to_node(&mut desired, machine);
    desired
}

/// Adds the Machine's taints to the Node.
///
/// A Machine taint is skipped when the Node already has a taint with the
/// same key and effect. Node taints are never removed or replaced.
pub fn add_taints_to_node(node: &mut Node, machine: &Machine) {
    for machine_taint in &machine.spec.taints {
        let already_present = node
            .spec
            .as_ref()
            .and_then(|spec| spec.taints.as_ref())
            .is_some_and(|taints| {
                taints
                    .iter()
                    .any(|t| t.key == machine_taint.key && t.effect == machine_taint.effect)
            });

        if already_present {
            debug!(
                "Skipping machine taint {:?}, node {} already has a taint with same key and effect",
                machine_taint,
                node.name_any()
            );
            continue;
        }

        debug!("Adding taint {:?} from machine {} to node {}", machine_taint, machine.name_any(), node.name_any());
        node.spec
            .get_or_insert_with(Default::default)
            .taints
            .get_or_insert_with(Vec::new)
            .push(Taint::from(machine_taint));
    }
}
