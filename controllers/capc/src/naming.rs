//! Provider-side names and identities.
//!
//! The Contabo API has no labels or tags on instances, so the instance
//! display name is the only place claim state can live:
//!
//! - `""`: unclaimed, available for reuse
//! - `[capc] <cluster-uuid> <role>-<index>`: bound to a machine of a cluster
//! - `[capc-error] <previous name>`: failed, excluded from reuse until an operator clears it
//! - anything else: not ours
//!
//! Every encode/decode of that convention goes through this module.

use crate::error::ControllerError;

pub const PROVIDER_ID_PREFIX: &str = "contabo://";
pub const DISPLAY_NAME_PREFIX: &str = "[capc]";
pub const ERROR_DISPLAY_NAME_PREFIX: &str = "[capc-error]";
pub const SSH_KEY_NAME_PREFIX: &str = "capc-";
pub const PRIVATE_NETWORK_NAME_PREFIX: &str = "capc-";

/// Contabo limit on display and secret names
pub const MAX_PROVIDER_NAME_LEN: usize = 255;
/// Kubernetes label-value / DNS label limit
pub const MAX_K8S_NAME_LEN: usize = 63;
/// Kubernetes DNS subdomain limit (object names)
pub const MAX_K8S_OBJECT_NAME_LEN: usize = 253;

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

pub fn build_provider_id(instance_id: i64) -> String {
    format!("{}{}", PROVIDER_ID_PREFIX, instance_id)
}

pub fn parse_provider_id(provider_id: &str) -> Result<i64, ControllerError> {
    let raw = provider_id.strip_prefix(PROVIDER_ID_PREFIX).ok_or_else(|| {
        ControllerError::InvalidProviderId(format!(
            "{:?} does not start with {}",
            provider_id, PROVIDER_ID_PREFIX
        ))
    })?;
    raw.parse::<i64>()
        .map_err(|e| ControllerError::InvalidProviderId(format!("{:?}: {}", provider_id, e)))
}

pub fn format_display_name(cluster_uuid: &str, role: &str, index: u32) -> String {
    truncate(
        format!("{} {} {}-{}", DISPLAY_NAME_PREFIX, cluster_uuid, role, index),
        MAX_PROVIDER_NAME_LEN,
    )
}

/// Display name marking an instance as failed; idempotent
pub fn format_error_display_name(display_name: &str) -> String {
    if display_name.starts_with(ERROR_DISPLAY_NAME_PREFIX) {
        return display_name.to_string();
    }
    truncate(
        format!("{} {}", ERROR_DISPLAY_NAME_PREFIX, display_name),
        MAX_PROVIDER_NAME_LEN,
    )
}

pub fn format_ssh_key_name(cluster_uuid: &str) -> String {
    truncate(format!("{}{}", SSH_KEY_NAME_PREFIX, cluster_uuid), MAX_PROVIDER_NAME_LEN)
}

pub fn format_private_network_name(cluster_uuid: &str) -> String {
    truncate(format!("{}{}", PRIVATE_NETWORK_NAME_PREFIX, cluster_uuid), MAX_K8S_NAME_LEN)
}

/// Kubernetes Secret holding the cluster's SSH key pair
pub fn ssh_secret_name(cluster_name: &str) -> String {
    truncate(format!("{}-ssh-key", cluster_name), MAX_K8S_OBJECT_NAME_LEN)
}

/// Claim state decoded from an instance display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceClaim<'a> {
    /// Empty display name
    Available,
    /// Bound to `<role>-<index>` of the cluster with this UUID
    Claimed { cluster_uuid: &'a str, machine: &'a str },
    /// Marked as failed by the provider
    Errored,
    /// Named by something other than this provider
    Foreign,
}

pub fn classify_display_name(display_name: &str) -> InstanceClaim<'_> {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        return InstanceClaim::Available;
    }
    if trimmed.starts_with(ERROR_DISPLAY_NAME_PREFIX) {
        return InstanceClaim::Errored;
    }
    let Some(rest) = trimmed.strip_prefix(DISPLAY_NAME_PREFIX) else {
        return InstanceClaim::Foreign;
    };
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(cluster_uuid), Some(machine), None) => {
            InstanceClaim::Claimed { cluster_uuid, machine }
        }
        _ => InstanceClaim::Foreign,
    }
}
