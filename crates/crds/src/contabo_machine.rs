//! ContaboMachine Custom Resource Definition
//!
//! Infrastructure counterpart of a Cluster API `Machine`, backed by one
//! Contabo compute instance that is either adopted from the pool of
//! unclaimed instances or created on demand.

use crate::capi::{
    CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL, DEPLOYMENT_NAME_LABEL, MACHINE_SET_NAME_LABEL,
};
use crate::conditions::{self, Condition};
use crate::error::CrdError;
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer guarding instance release of a ContaboMachine
pub const MACHINE_FINALIZER: &str = "contabomachine.infrastructure.cluster.x-k8s.io";

/// Role name used for control-plane machines
pub const CONTROL_PLANE_ROLE: &str = "control-plane";

/// Role name used for workers outside any MachineDeployment / MachineSet
pub const DEFAULT_WORKER_ROLE: &str = "worker";

fn default_user() -> String {
    "admin".to_string()
}

/// ContaboMachineSpec defines the desired backing instance of a machine
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ContaboMachine",
    namespaced,
    status = "ContaboMachineStatus",
    shortname = "cma",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Index","type":"integer","jsonPath":".spec.index"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ContaboMachineSpec {
    /// `contabo://<instanceId>` once an instance is bound
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Stable per-role index, assigned once and persisted before any instance is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    /// Instance template
    pub instance: InstanceSpec,

    /// Additional private network names; the cluster network is always attached
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_networks: Vec<String>,

    /// Additional provider secret IDs installed on the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Contabo product (e.g., "V45")
    pub product_id: String,

    /// OS image installed on create / reinstall
    pub image_id: String,

    /// Region; defaults to the ContaboCluster region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Informational only; the provider manages display names itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default)]
    pub provisioning_type: ProvisioningType,

    /// Login user created by the image and used for the SSH check
    #[serde(default = "default_user")]
    pub default_user: String,
}

/// Whether the provider may order new instances
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ProvisioningType {
    /// Only adopt instances from the available pool
    ReuseOnly,
    /// Adopt when possible, otherwise create
    #[default]
    ReuseOrCreate,
}

/// ContaboMachineStatus reports the observed backing instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContaboMachineStatus {
    #[serde(default)]
    pub ready: bool,

    /// Snapshot of the instance at the last observation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceSnapshot>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Consecutive failed SSH checks during bootstrap
    #[serde(default)]
    pub ssh_attempts: u32,

    /// When the bootstrap check first ran for the current instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_started_at: Option<DateTime<Utc>>,

    /// Start of the current failure streak, drives recovery backoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_since: Option<DateTime<Utc>>,

    /// Start of the current run of failed deletion attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_failing_since: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub instance_id: i64,
    pub status: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub product_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineAddressType {
    Hostname,
    ExternalIP,
    InternalIP,
    ExternalDNS,
    InternalDNS,
}

/// Address in the shape Cluster API copies onto the Machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MachineAddress {
    #[serde(rename = "type")]
    pub type_: MachineAddressType,
    pub address: String,
}

impl MachineAddress {
    pub fn new(type_: MachineAddressType, address: impl Into<String>) -> Self {
        Self {
            type_,
            address: address.into(),
        }
    }
}

impl ContaboMachine {
    /// Cluster this machine belongs to, from the Cluster API label
    pub fn cluster_name(&self) -> Result<String, CrdError> {
        self.labels()
            .get(CLUSTER_NAME_LABEL)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| CrdError::MissingLabel {
                kind: "ContaboMachine",
                name: self.name_any(),
                label: CLUSTER_NAME_LABEL,
            })
    }

    pub fn is_control_plane(&self) -> bool {
        self.labels().contains_key(CONTROL_PLANE_LABEL)
    }

    /// Role used for display names and index grouping
    ///
    /// `control-plane`, else the MachineDeployment name, else the MachineSet
    /// name, else `worker`.
    pub fn role(&self) -> String {
        if self.is_control_plane() {
            return CONTROL_PLANE_ROLE.to_string();
        }
        let labels = self.labels();
        labels
            .get(DEPLOYMENT_NAME_LABEL)
            .or_else(|| labels.get(MACHINE_SET_NAME_LABEL))
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_WORKER_ROLE.to_string())
    }

    /// Name of the owning Cluster API Machine
    pub fn owner_machine_name(&self) -> Option<String> {
        self.owner_references()
            .iter()
            .find(|o| o.kind == "Machine" && o.api_version.starts_with("cluster.x-k8s.io/"))
            .map(|o| o.name.clone())
    }

    pub fn instance_id(&self) -> Option<i64> {
        self.status
            .as_ref()
            .and_then(|s| s.instance.as_ref())
            .map(|i| i.instance_id)
    }

    /// Current `InstanceReady` reason, which is the machine phase
    pub fn phase(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| {
                conditions::find_condition(&s.conditions, conditions::types::INSTANCE_READY)
            })
            .map(|c| c.reason.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn machine(labels: &[(&str, &str)]) -> ContaboMachine {
        ContaboMachine {
            metadata: ObjectMeta {
                name: Some("m-0".to_string()),
                namespace: Some("default".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            spec: ContaboMachineSpec {
                provider_id: None,
                index: None,
                instance: InstanceSpec {
                    product_id: "V45".to_string(),
                    image_id: "ubuntu-22.04".to_string(),
                    region: None,
                    display_name: None,
                    provisioning_type: ProvisioningType::ReuseOrCreate,
                    default_user: "admin".to_string(),
                },
                private_networks: vec![],
                ssh_keys: vec![],
            },
            status: None,
        }
    }

    #[test]
    fn test_role_prefers_control_plane_then_pool() {
        let cp = machine(&[
            (CLUSTER_NAME_LABEL, "c1"),
            (CONTROL_PLANE_LABEL, ""),
            (DEPLOYMENT_NAME_LABEL, "md-0"),
        ]);
        assert_eq!(cp.role(), "control-plane");

        let md = machine(&[
            (DEPLOYMENT_NAME_LABEL, "md-0"),
            (MACHINE_SET_NAME_LABEL, "md-0-abcde"),
        ]);
        assert_eq!(md.role(), "md-0");

        let ms = machine(&[(MACHINE_SET_NAME_LABEL, "ms-1")]);
        assert_eq!(ms.role(), "ms-1");

        assert_eq!(machine(&[]).role(), "worker");
    }

    #[test]
    fn test_cluster_name_requires_label() {
        assert_eq!(machine(&[(CLUSTER_NAME_LABEL, "c1")]).cluster_name().unwrap(), "c1");
        assert!(machine(&[]).cluster_name().is_err());
    }

    #[test]
    fn test_spec_defaults() {
        let spec: ContaboMachineSpec = serde_json::from_value(serde_json::json!({
            "instance": {"productId": "V45", "imageId": "img"}
        }))
        .unwrap();
        assert_eq!(spec.instance.provisioning_type, ProvisioningType::ReuseOrCreate);
        assert_eq!(spec.instance.default_user, "admin");
        assert!(spec.provider_id.is_none());
    }
}
