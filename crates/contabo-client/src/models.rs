//! Contabo API models
//!
//! These models match the JSON bodies of the Contabo public API
//! (https://api.contabo.com). Every response wraps its payload in a
//! `data` array; list endpoints add a `_pagination` block.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Contabo API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(rename = "_pagination", default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// Pagination block of list responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u64,
    #[serde(default)]
    pub page: u64,
}

/// Lifecycle status reported for a compute instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Creating,
    Provisioning,
    Installing,
    Running,
    Stopped,
    Error,
    Uninstalled,
    ManualProvisioning,
    ProductNotAvailable,
    VerificationRequired,
    PendingPayment,
    Rescue,
    ResetPassword,
    #[default]
    Unknown,
    #[serde(other)]
    Other,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Creating => "creating",
            InstanceStatus::Provisioning => "provisioning",
            InstanceStatus::Installing => "installing",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
            InstanceStatus::Uninstalled => "uninstalled",
            InstanceStatus::ManualProvisioning => "manual_provisioning",
            InstanceStatus::ProductNotAvailable => "product_not_available",
            InstanceStatus::VerificationRequired => "verification_required",
            InstanceStatus::PendingPayment => "pending_payment",
            InstanceStatus::Rescue => "rescue",
            InstanceStatus::ResetPassword => "reset_password",
            InstanceStatus::Unknown => "unknown",
            InstanceStatus::Other => "other",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IPv4 configuration of an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpV4 {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub netmask_cidr: u8,
    #[serde(default)]
    pub gateway: String,
}

/// IPv6 configuration of an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpV6 {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub netmask_cidr: u8,
    #[serde(default)]
    pub gateway: String,
}

/// Public addressing of an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v4: Option<IpV4>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v6: Option<IpV6>,
}

/// Compute instance (`/v1/compute/instances`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub instance_id: i64,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub name: String,
    /// Free-form label; the provider encodes claim state here
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub data_center: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub ip_config: IpConfig,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub ssh_keys: Vec<i64>,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub default_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
}

/// Filters for listing instances
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub display_name: Option<String>,
    pub region: Option<String>,
    pub product_ids: Vec<String>,
    pub status: Option<InstanceStatus>,
}

impl InstanceFilter {
    /// Query parameters understood by `GET /v1/compute/instances`
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(name) = &self.display_name {
            query.push(("displayName".to_string(), name.clone()));
        }
        if let Some(region) = &self.region {
            query.push(("region".to_string(), region.clone()));
        }
        if !self.product_ids.is_empty() {
            query.push(("productIds".to_string(), self.product_ids.join(",")));
        }
        if let Some(status) = &self.status {
            query.push(("status".to_string(), status.as_str().to_string()));
        }
        query
    }
}

/// Request body for `POST /v1/compute/instances`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    pub product_id: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_user: Option<String>,
    /// Contract period in months
    pub period: u32,
}

/// Request body for `PUT /v1/compute/instances/{id}` (reinstall)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReinstallInstanceRequest {
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_user: Option<String>,
}

/// Request body for `PATCH /v1/compute/instances/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchInstanceRequest {
    pub display_name: String,
}

/// Minimal body returned by create / reinstall / action endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRef {
    pub instance_id: i64,
    #[serde(default)]
    pub status: Option<InstanceStatus>,
}

/// Power actions available under `/actions/{action}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceAction {
    Start,
    Stop,
    Restart,
}

impl InstanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceAction::Start => "start",
            InstanceAction::Stop => "stop",
            InstanceAction::Restart => "restart",
        }
    }
}

/// Private IPv4 address of an instance inside a private network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateIpV4 {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub netmask_cidr: u8,
    #[serde(default)]
    pub gateway: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateIpConfig {
    #[serde(default)]
    pub v4: Vec<PrivateIpV4>,
}

/// Instance membership record of a private network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateNetworkInstance {
    pub instance_id: i64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub private_ip_config: PrivateIpConfig,
    #[serde(default)]
    pub status: Option<InstanceStatus>,
}

impl PrivateNetworkInstance {
    /// First private IPv4 address, if the provider assigned one yet
    pub fn private_ipv4(&self) -> Option<&str> {
        self.private_ip_config
            .v4
            .iter()
            .map(|v4| v4.ip.as_str())
            .find(|ip| !ip.is_empty())
    }
}

/// Private network (`/v1/private-networks`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateNetwork {
    pub private_network_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub data_center: String,
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub instances: Vec<PrivateNetworkInstance>,
}

impl PrivateNetwork {
    pub fn has_instance(&self, instance_id: i64) -> bool {
        self.instances.iter().any(|i| i.instance_id == instance_id)
    }

    pub fn instance(&self, instance_id: i64) -> Option<&PrivateNetworkInstance> {
        self.instances.iter().find(|i| i.instance_id == instance_id)
    }
}

/// Request body for `POST /v1/private-networks`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrivateNetworkRequest {
    pub region: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Secret type stored by the secrets API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretType {
    Ssh,
    Password,
}

impl SecretType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretType::Ssh => "ssh",
            SecretType::Password => "password",
        }
    }
}

/// Stored secret (`/v1/secrets`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub secret_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type")]
    pub secret_type: SecretType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Request body for `POST /v1/secrets`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSecretRequest {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub secret_type: SecretType,
}
