//! Test utilities for unit testing the controller
//!
//! In-memory fakes for the cache and update seams, plus builders for test
//! Nodes and Machines.

use crate::error::ControllerError;
use crate::handlers::EventHandler;
use crate::keys::object_key;
use crate::stores::{MachineStore, NodeStore, NodeUpdater};
use crds::{Machine, MachineAddress, MachineSpec, MachineStatus, MachineTaint};
use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeSpec, NodeStatus, Taint};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Helper to create a test Node with an optional linkage annotation and InternalIP
pub fn create_test_node(name: &str, machine_annotation: Option<&str>, internal_ip: Option<&str>) -> Node {
    let annotations = machine_annotation.map(|value| {
        BTreeMap::from([(crate::reconciler::MACHINE_ANNOTATION_KEY.to_string(), value.to_string())])
    });
    let addresses = internal_ip.map(|ip| {
        vec![
            NodeAddress { type_: "Hostname".to_string(), address: name.to_string() },
            NodeAddress { type_: "InternalIP".to_string(), address: ip.to_string() },
        ]
    });

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations,
            labels: Some(BTreeMap::from([(
                "kubernetes.io/hostname".to_string(),
                name.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            addresses,
            ..Default::default()
        }),
    }
}

/// Helper to create a test Machine with an optional InternalIP
pub fn create_test_machine(namespace: &str, name: &str, internal_ip: Option<&str>) -> Machine {
    let mut machine = Machine::new(name, MachineSpec::default());
    machine.metadata.namespace = Some(namespace.to_string());
    machine.status = Some(MachineStatus {
        addresses: internal_ip
            .map(|ip| {
                vec![MachineAddress {
                    type_: "InternalIP".to_string(),
                    address: ip.to_string(),
                }]
            })
            .unwrap_or_default(),
        ..Default::default()
    });
    machine
}

pub fn machine_taint(key: &str, effect: &str) -> MachineTaint {
    MachineTaint {
        key: key.to_string(),
        value: None,
        effect: effect.to_string(),
        time_added: None,
    }
}

pub fn node_taint(key: &str, effect: &str) -> Taint {
    Taint {
        key: key.to_string(),
        effect: effect.to_string(),
        ..Default::default()
    }
}

/// In-memory Node cache
#[derive(Debug, Default, Clone)]
pub struct FakeNodeStore {
    nodes: Arc<Mutex<HashMap<String, Arc<Node>>>>,
}

impl FakeNodeStore {
    pub fn add(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.lock().unwrap().insert(name, Arc::new(node));
    }

    pub fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.lock().unwrap().get(name).cloned()
    }
}

impl NodeStore for FakeNodeStore {
    fn get_node(&self, name: &str) -> Result<Option<Arc<Node>>, ControllerError> {
        Ok(self.node(name))
    }
}

/// Node cache that panics when asked for one particular Node.
#[derive(Debug, Clone)]
pub struct PanickingNodeStore {
    inner: FakeNodeStore,
    poisoned: String,
}

impl PanickingNodeStore {
    pub fn new(inner: FakeNodeStore, poisoned: &str) -> Self {
        Self {
            inner,
            poisoned: poisoned.to_string(),
        }
    }
}

impl NodeStore for PanickingNodeStore {
    fn get_node(&self, name: &str) -> Result<Option<Arc<Node>>, ControllerError> {
        if name == self.poisoned {
            panic!("cache lookup for {name} blew up");
        }
        self.inner.get_node(name)
    }
}

/// In-memory Machine cache
#[derive(Debug, Default, Clone)]
pub struct FakeMachineStore {
    machines: Arc<Mutex<HashMap<(String, String), Arc<Machine>>>>,
}

impl FakeMachineStore {
    pub fn add(&self, machine: Machine) -> Arc<Machine> {
        let key = (
            machine.metadata.namespace.clone().unwrap_or_default(),
            machine.metadata.name.clone().unwrap_or_default(),
        );
        let machine = Arc::new(machine);
        self.machines.lock().unwrap().insert(key, Arc::clone(&machine));
        machine
    }
}

impl MachineStore for FakeMachineStore {
    fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Arc<Machine>>, ControllerError> {
        Ok(self
            .machines
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Records every update and writes it back into the Node cache, like the
/// watch feed eventually would.
#[derive(Debug, Default, Clone)]
pub struct RecordingUpdater {
    nodes: FakeNodeStore,
    updates: Arc<Mutex<Vec<Node>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl RecordingUpdater {
    pub fn new(nodes: FakeNodeStore) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }

    pub fn updates(&self) -> Vec<Node> {
        self.updates.lock().unwrap().clone()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    /// Makes every following update fail as a rejected API request.
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait::async_trait]
impl NodeUpdater for RecordingUpdater {
    async fn update_node(&self, node: &Node) -> Result<Node, ControllerError> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(ControllerError::Kube(kube::Error::Service(message.into())));
        }
        self.updates.lock().unwrap().push(node.clone());
        self.nodes.add(node.clone());
        Ok(node.clone())
    }
}

/// Records subscriber calls as `"<kind> <key>"` strings.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, kind: &str, machine: &Machine) {
        let key = object_key(machine).unwrap_or_default();
        self.events.lock().unwrap().push(format!("{kind} {key}"));
    }
}

impl EventHandler<Machine> for RecordingHandler {
    fn on_add(&self, obj: &Arc<Machine>) {
        self.record("add", obj);
    }

    fn on_update(&self, _old: &Arc<Machine>, new: &Arc<Machine>) {
        self.record("update", new);
    }

    fn on_delete(&self, obj: &Arc<Machine>) {
        self.record("delete", obj);
    }
}
