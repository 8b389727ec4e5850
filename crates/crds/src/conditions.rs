//! Status conditions shared by ContaboCluster and ContaboMachine
//!
//! Conditions follow the Kubernetes API conventions. The reconcilers write
//! every outcome, success or failure, to a condition before returning.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types
pub mod types {
    pub const READY: &str = "Ready";

    // ContaboCluster
    pub const CLUSTER_UUID_READY: &str = "ClusterUuidReady";
    pub const PRIVATE_NETWORK_READY: &str = "PrivateNetworkReady";
    pub const SSH_KEY_READY: &str = "SshKeyReady";
    pub const CONTROL_PLANE_ENDPOINT_READY: &str = "ControlPlaneEndpointReady";

    // ContaboMachine
    pub const INSTANCE_READY: &str = "InstanceReady";
    pub const BOOTSTRAP_READY: &str = "BootstrapReady";
    pub const PRIVATE_NETWORK_ATTACHED: &str = "PrivateNetworkAttached";
    pub const INDEX_ASSIGNED: &str = "IndexAssigned";
}

/// Condition reasons
pub mod reasons {
    pub const READY: &str = "Ready";
    pub const WAITING: &str = "Waiting";
    pub const DELETING: &str = "Deleting";

    pub const CLUSTER_UUID_ASSIGNED: &str = "ClusterUuidAssigned";
    pub const PRIVATE_NETWORK_CREATED: &str = "PrivateNetworkCreated";
    pub const PRIVATE_NETWORK_FAILED: &str = "PrivateNetworkFailed";
    pub const SSH_KEY_CREATED: &str = "SshKeyCreated";
    pub const SSH_KEY_FAILED: &str = "SshKeyFailed";
    pub const WAITING_FOR_CONTROL_PLANE: &str = "WaitingForControlPlane";
    pub const ENDPOINT_PUBLISH_FAILED: &str = "EndpointPublishFailed";

    pub const WAITING_FOR_OWNER: &str = "WaitingForOwner";
    pub const WAITING_FOR_CLUSTER: &str = "WaitingForClusterInfrastructure";
    pub const WAITING_FOR_BOOTSTRAP_DATA: &str = "WaitingForBootstrapData";
    pub const INDEX_FAILED: &str = "IndexAssignmentFailed";
    pub const ATTACH_FAILED: &str = "PrivateNetworkAttachFailed";
    pub const CLOUD_INIT_RUNNING: &str = "CloudInitRunning";
    pub const CLOUD_INIT_FAILED: &str = "CloudInitFailed";
    pub const SSH_UNREACHABLE: &str = "SshUnreachable";
    pub const NO_AVAILABLE_INSTANCE: &str = "NoAvailableInstance";
    pub const PROVIDER_ERROR: &str = "ProviderError";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Status of a condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, InstanceReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition's status changed
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn true_(
        type_: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(type_, ConditionStatus::True, reason, message)
    }

    pub fn false_(
        type_: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(type_, ConditionStatus::False, reason, message)
    }
}

/// Insert or replace a condition by type.
///
/// `lastTransitionTime` is carried over when the status did not change.
/// Returns true when anything observable changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status
                && existing.reason == condition.reason
                && existing.message == condition.message
            {
                return false;
            }
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}
