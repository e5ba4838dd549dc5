//! Machine CRD
//!
//! Infrastructure-lifecycle record of a single worker instance. Machines are
//! created and destroyed by the machine-lifecycle system; the node-link
//! controller only reads them to find the Node that runs on the instance.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Taint;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Address type reported for the cluster-internal address of an instance.
pub const ADDRESS_TYPE_INTERNAL_IP: &str = "InternalIP";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    shortname = "ma"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Metadata declared for the Node backed by this Machine
    #[serde(default)]
    pub metadata: NodeMetadata,

    /// Taints the Node backed by this Machine should carry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<MachineTaint>,

    /// Cloud provider identifier of the instance
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Desired Node metadata declared on a Machine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    /// Labels copied onto the Node; they win over Node labels with the same key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Part of the machine API schema; not propagated to the Node
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A taint declared on a Machine.
///
/// Mirrors the core `Taint` field-for-field so it converts without loss.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineTaint {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// `NoSchedule`, `PreferNoSchedule` or `NoExecute`
    pub effect: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<chrono::DateTime<chrono::Utc>>")]
    pub time_added: Option<Time>,
}

impl From<&MachineTaint> for Taint {
    fn from(taint: &MachineTaint) -> Self {
        Taint {
            key: taint.key.clone(),
            value: taint.value.clone(),
            effect: taint.effect.clone(),
            time_added: taint.time_added.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Addresses reported by the infrastructure provider
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Node the machine-lifecycle system believes backs this Machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<MachineNodeRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    /// Address type, e.g. `InternalIP`, `ExternalIP`, `Hostname`
    #[serde(rename = "type")]
    pub type_: String,

    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineNodeRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl Machine {
    /// First `InternalIP` reported in the Machine status, if any.
    #[must_use]
    pub fn internal_ip(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .addresses
            .iter()
            .find(|a| a.type_ == ADDRESS_TYPE_INTERNAL_IP)
            .map(|a| a.address.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_ip_takes_first_internal_address() {
        let mut machine = Machine::new("m1", MachineSpec::default());
        machine.status = Some(MachineStatus {
            addresses: vec![
                MachineAddress { type_: "ExternalIP".to_string(), address: "1.2.3.4".to_string() },
                MachineAddress { type_: "InternalIP".to_string(), address: "10.0.0.1".to_string() },
                MachineAddress { type_: "InternalIP".to_string(), address: "10.0.0.2".to_string() },
            ],
            ..Default::default()
        });

        assert_eq!(machine.internal_ip(), Some("10.0.0.1"));
    }

    #[test]
    fn test_internal_ip_without_status() {
        let machine = Machine::new("m1", MachineSpec::default());
        assert_eq!(machine.internal_ip(), None);
    }

    #[test]
    fn test_spec_deserializes_machine_api_shape() {
        let spec: MachineSpec = serde_json::from_value(serde_json::json!({
            "metadata": { "labels": { "tier": "worker" } },
            "taints": [{ "key": "dedicated", "effect": "NoSchedule" }],
            "providerID": "aws:///us-east-1a/i-0123"
        }))
        .unwrap();

        assert_eq!(spec.metadata.labels.get("tier").map(String::as_str), Some("worker"));
        assert_eq!(spec.taints[0].key, "dedicated");
        assert_eq!(spec.taints[0].value, None);
        assert_eq!(spec.provider_id.as_deref(), Some("aws:///us-east-1a/i-0123"));
    }

    #[test]
    fn test_taint_conversion_keeps_fields() {
        let taint = MachineTaint {
            key: "dedicated".to_string(),
            value: Some("infra".to_string()),
            effect: "NoSchedule".to_string(),
            time_added: None,
        };
        let core = Taint::from(&taint);
        assert_eq!(core.key, "dedicated");
        assert_eq!(core.value.as_deref(), Some("infra"));
        assert_eq!(core.effect, "NoSchedule");
        assert!(core.time_added.is_none());
    }

    #[test]
    fn test_taint_conversion_carries_time_added() {
        let taint: MachineTaint = serde_json::from_value(serde_json::json!({
            "key": "node.kubernetes.io/unreachable",
            "effect": "NoExecute",
            "timeAdded": "2024-05-01T12:00:00Z"
        }))
        .unwrap();
        assert!(taint.time_added.is_some());

        let core = Taint::from(&taint);
        assert_eq!(core.time_added, taint.time_added);
        assert_eq!(
            serde_json::to_value(&core).unwrap()["timeAdded"],
            serde_json::json!("2024-05-01T12:00:00Z")
        );
    }
}
