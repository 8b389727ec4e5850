//! ContaboCluster Custom Resource Definition
//!
//! Infrastructure counterpart of a Cluster API `Cluster`. Owns the
//! cluster-wide provider resources: the private network every machine joins,
//! the SSH key installed on every instance, and the control-plane endpoint.

use crate::conditions::Condition;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer guarding provider-side cleanup of a ContaboCluster
pub const CLUSTER_FINALIZER: &str = "contabocluster.infrastructure.cluster.x-k8s.io";

/// Default Contabo region
pub const DEFAULT_REGION: &str = "EU";

/// Default API server port
pub const DEFAULT_API_SERVER_PORT: i32 = 6443;

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// ContaboClusterSpec defines the desired state of a Contabo-backed cluster
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ContaboCluster",
    namespaced,
    status = "ContaboClusterStatus",
    shortname = "ccl",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.controlPlaneEndpoint.host"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ContaboClusterSpec {
    /// Contabo region for the private network and default instance placement
    #[serde(default = "default_region")]
    pub region: String,

    /// API server endpoint; filled from the first control-plane machine when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// Private network settings
    #[serde(default)]
    pub private_network: PrivateNetworkSpec,

    /// SSH key settings
    #[serde(default)]
    pub ssh_key: SshKeySpec,
}

/// Host and port of the Kubernetes API server
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    pub host: String,
    pub port: i32,
}

impl ApiEndpoint {
    pub fn is_set(&self) -> bool {
        !self.host.is_empty() && self.port > 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivateNetworkSpec {
    /// Description stored on the provider network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshKeySpec {
    /// Extra provider secret IDs installed on every instance of the cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_secret_ids: Vec<i64>,
}

/// ContaboClusterStatus reports the provider-side state of the cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContaboClusterStatus {
    /// Consumed by Cluster API to unblock machine creation
    #[serde(default)]
    pub ready: bool,

    /// Random identifier generated once; seeds every provider-side name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network: Option<PrivateNetworkStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<SshKeyStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateNetworkStatus {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub region: String,
    /// Instances attached at the last observation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyStatus {
    /// Provider secret ID of the public key
    pub secret_id: i64,
    pub name: String,
    pub public_key: String,
}

impl ContaboCluster {
    /// Name of the owning Cluster API Cluster
    pub fn owner_cluster_name(&self) -> Option<String> {
        self.owner_references()
            .iter()
            .find(|o| o.kind == "Cluster" && o.api_version.starts_with("cluster.x-k8s.io/"))
            .map(|o| o.name.clone())
    }

    pub fn cluster_uuid(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.cluster_uuid.as_deref())
    }

    pub fn private_network_id(&self) -> Option<i64> {
        self.status
            .as_ref()
            .and_then(|s| s.private_network.as_ref())
            .map(|n| n.id)
    }

    pub fn ssh_secret_id(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.ssh_key.as_ref()).map(|k| k.secret_id)
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }
}
