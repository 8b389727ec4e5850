//! ContaboCluster reconciliation
//!
//! Brings up the resources shared by every machine of a cluster, in order:
//! cluster UUID, private network, SSH key, control-plane endpoint and its
//! Service/EndpointSlices. Each step finds before it creates, so a pass
//! interrupted anywhere can simply run again.

use super::Reconciler;
use crate::endpoints;
use crate::error::ControllerError;
use crate::naming::{format_private_network_name, format_ssh_key_name, ssh_secret_name};
use crate::reconcile_helpers::{
    condition_message, ignore_not_found, owner_reference, requeue_secs, resource_key, secret_value,
    status_needs_update,
};
use crate::ssh::generate_key_pair;
use contabo_client::{CreatePrivateNetworkRequest, CreateSecretRequest, PrivateNetwork, SecretType};
use crds::conditions::{reasons, set_condition, types};
use crds::{
    ApiEndpoint, Condition, ContaboCluster, ContaboClusterStatus, ContaboMachine,
    MachineAddressType, PrivateNetworkStatus, SshKeyStatus, CLUSTER_FINALIZER,
    CLUSTER_NAME_LABEL, DEFAULT_API_SERVER_PORT,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{error, info, warn};

pub const SSH_PRIVATE_KEY_FIELD: &str = "private-key";
pub const SSH_PUBLIC_KEY_FIELD: &str = "public-key";

/// Key type and base64 body; comments differ between encoders
fn same_public_key(a: &str, b: &str) -> bool {
    let fields = |s: &str| s.split_whitespace().take(2).map(str::to_string).collect::<Vec<_>>();
    fields(a) == fields(b)
}

/// External IPv4 of the first control-plane machine, by index then name
pub(crate) fn first_control_plane_address(machines: &[ContaboMachine]) -> Option<String> {
    let mut control_planes: Vec<&ContaboMachine> = machines
        .iter()
        .filter(|m| m.is_control_plane() && m.metadata.deletion_timestamp.is_none())
        .collect();
    control_planes.sort_by_key(|m| (m.spec.index.unwrap_or(u32::MAX), m.name_any()));

    control_planes.into_iter().find_map(|m| {
        let status = m.status.as_ref()?;
        status
            .addresses
            .iter()
            .filter(|a| a.type_ == MachineAddressType::ExternalIP)
            .find(|a| a.address.parse::<Ipv4Addr>().is_ok())
            .map(|a| a.address.clone())
            .or_else(|| status.instance.as_ref().and_then(|i| i.ipv4.clone()))
    })
}

fn endpoint_failed(status: &mut ContaboClusterStatus, error: ControllerError) -> ControllerError {
    set_condition(
        &mut status.conditions,
        Condition::false_(
            types::CONTROL_PLANE_ENDPOINT_READY,
            reasons::ENDPOINT_PUBLISH_FAILED,
            condition_message(&error),
        ),
    );
    error
}

impl Reconciler {
    pub async fn reconcile_contabo_cluster(
        &self,
        cc: &ContaboCluster,
    ) -> Result<Action, ControllerError> {
        let namespace = cc.namespace().unwrap_or_default();
        let name = cc.name_any();

        if cc.metadata.deletion_timestamp.is_some() {
            return self.delete_contabo_cluster(cc).await;
        }

        let Some(owner) = cc.owner_cluster_name() else {
            info!("ContaboCluster {}/{} has no owner Cluster yet", namespace, name);
            return Ok(requeue_secs(10));
        };
        match self.kube.get_cluster(&namespace, &owner).await? {
            None => {
                info!("Waiting for Cluster {}/{} owning ContaboCluster {}", namespace, owner, name);
                return Ok(requeue_secs(10));
            }
            Some(cluster) if cluster.is_paused() => {
                info!(
                    "Cluster {}/{} is paused, skipping ContaboCluster {}",
                    namespace, owner, name
                );
                return Ok(requeue_secs(30));
            }
            Some(_) => {}
        }

        if !cc.finalizers().iter().any(|f| f == CLUSTER_FINALIZER) {
            self.kube.add_cluster_finalizer(&namespace, &name).await?;
        }

        info!("Reconciling ContaboCluster {}/{}", namespace, name);
        let mut status = cc.status.clone().unwrap_or_default();
        let outcome = self.ensure_cluster_infrastructure(cc, &owner, &mut status).await;
        if let Err(e) = &outcome {
            set_condition(
                &mut status.conditions,
                Condition::false_(types::READY, reasons::RECONCILE_FAILED, condition_message(e)),
            );
        }

        let write = if status_needs_update(cc.status.as_ref(), &status) {
            self.kube.patch_contabo_cluster_status(&namespace, &name, &status).await
        } else {
            Ok(())
        };

        match (outcome, write) {
            (Err(e), _) => {
                error!("ContaboCluster {}/{} reconcile failed: {}", namespace, name, e);
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
            (Ok(action), Ok(())) => {
                self.reset_backoff(&resource_key(cc));
                Ok(action)
            }
        }
    }

    async fn ensure_cluster_infrastructure(
        &self,
        cc: &ContaboCluster,
        owner: &str,
        status: &mut ContaboClusterStatus,
    ) -> Result<Action, ControllerError> {
        let namespace = cc.namespace().unwrap_or_default();
        let name = cc.name_any();

        // The UUID names every provider resource, so it must be durable first.
        let uuid = match status.cluster_uuid.clone() {
            Some(uuid) => uuid,
            None => {
                let uuid = uuid::Uuid::new_v4().to_string();
                status.cluster_uuid = Some(uuid.clone());
                set_condition(
                    &mut status.conditions,
                    Condition::true_(
                        types::CLUSTER_UUID_READY,
                        reasons::CLUSTER_UUID_ASSIGNED,
                        uuid.clone(),
                    ),
                );
                self.kube.patch_contabo_cluster_status(&namespace, &name, status).await?;
                info!("Assigned cluster UUID {} to ContaboCluster {}/{}", uuid, namespace, name);
                uuid
            }
        };

        let network = match self.ensure_private_network(cc, &uuid, status).await {
            Ok(network) => network,
            Err(e) => {
                set_condition(
                    &mut status.conditions,
                    Condition::false_(
                        types::PRIVATE_NETWORK_READY,
                        reasons::PRIVATE_NETWORK_FAILED,
                        condition_message(&e),
                    ),
                );
                return Err(e);
            }
        };
        set_condition(
            &mut status.conditions,
            Condition::true_(
                types::PRIVATE_NETWORK_READY,
                reasons::PRIVATE_NETWORK_CREATED,
                format!("{} ({})", network.name, network.cidr),
            ),
        );
        status.private_network = Some(PrivateNetworkStatus {
            id: network.private_network_id,
            name: network.name.clone(),
            cidr: network.cidr.clone(),
            region: network.region.clone(),
            instance_ids: network.instances.iter().map(|i| i.instance_id).collect(),
        });

        match self.ensure_ssh_key(cc, &uuid, status).await {
            Ok(key) => {
                set_condition(
                    &mut status.conditions,
                    Condition::true_(
                        types::SSH_KEY_READY,
                        reasons::SSH_KEY_CREATED,
                        format!("secret {}", key.secret_id),
                    ),
                );
                status.ssh_key = Some(key);
            }
            Err(e) => {
                set_condition(
                    &mut status.conditions,
                    Condition::false_(
                        types::SSH_KEY_READY,
                        reasons::SSH_KEY_FAILED,
                        condition_message(&e),
                    ),
                );
                return Err(e);
            }
        }

        // Machines need the network and key; the endpoint comes from them.
        status.ready = true;
        status.failure_message = None;

        let machines = match self.kube.list_contabo_machines(&namespace, owner).await {
            Ok(machines) => machines,
            Err(e) => return Err(endpoint_failed(status, e)),
        };

        let endpoint = match cc.spec.control_plane_endpoint.as_ref().filter(|e| e.is_set()) {
            Some(endpoint) => endpoint.clone(),
            None => match first_control_plane_address(&machines) {
                Some(host) => {
                    let endpoint = ApiEndpoint {
                        host,
                        port: DEFAULT_API_SERVER_PORT,
                    };
                    if let Err(e) = self
                        .kube
                        .set_cluster_endpoint(&namespace, &name, &endpoint)
                        .await
                    {
                        return Err(endpoint_failed(status, e));
                    }
                    info!(
                        "Set control-plane endpoint of ContaboCluster {}/{} to {}:{}",
                        namespace, name, endpoint.host, endpoint.port
                    );
                    endpoint
                }
                None => {
                    set_condition(
                        &mut status.conditions,
                        Condition::false_(
                            types::CONTROL_PLANE_ENDPOINT_READY,
                            reasons::WAITING_FOR_CONTROL_PLANE,
                            "waiting for a control-plane machine with an external IPv4 address",
                        ),
                    );
                    set_condition(
                        &mut status.conditions,
                        Condition::false_(
                            types::READY,
                            reasons::WAITING_FOR_CONTROL_PLANE,
                            "control-plane endpoint not set",
                        ),
                    );
                    return Ok(requeue_secs(10));
                }
            },
        };

        if let Err(e) = endpoints::publish(self.kube.as_ref(), cc, &machines).await {
            return Err(endpoint_failed(status, e));
        }
        set_condition(
            &mut status.conditions,
            Condition::true_(
                types::CONTROL_PLANE_ENDPOINT_READY,
                reasons::READY,
                format!("{}:{}", endpoint.host, endpoint.port),
            ),
        );
        set_condition(&mut status.conditions, Condition::true_(types::READY, reasons::READY, ""));

        Ok(requeue_secs(60))
    }

    /// Recorded network, else the one named after the UUID, else a new one
    async fn ensure_private_network(
        &self,
        cc: &ContaboCluster,
        uuid: &str,
        status: &ContaboClusterStatus,
    ) -> Result<PrivateNetwork, ControllerError> {
        let network_name = format_private_network_name(uuid);

        if let Some(id) = status.private_network.as_ref().map(|n| n.id) {
            match self.contabo.get_private_network(id).await {
                Ok(network) => return Ok(network),
                Err(e) if e.is_not_found() => {
                    warn!(
                        "Private network {} recorded on ContaboCluster {} is gone",
                        id,
                        cc.name_any()
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(existing) = self
            .contabo
            .list_private_networks(Some(&network_name))
            .await?
            .into_iter()
            .find(|n| n.name == network_name)
        {
            info!("Adopted private network {} ({})", existing.name, existing.private_network_id);
            return Ok(existing);
        }

        let description = cc
            .spec
            .private_network
            .description
            .clone()
            .unwrap_or_else(|| format!("Cluster API cluster {}", cc.name_any()));
        let created = self
            .contabo
            .create_private_network(&CreatePrivateNetworkRequest {
                region: cc.spec.region.clone(),
                name: network_name,
                description: Some(description),
            })
            .await?;
        info!(
            "Created private network {} ({}, {}) in {}",
            created.name, created.private_network_id, created.cidr, cc.spec.region
        );
        Ok(created)
    }

    /// Public key from the cluster's key Secret, generating the pair if absent
    async fn ensure_ssh_key_secret(&self, cc: &ContaboCluster) -> Result<String, ControllerError> {
        let namespace = cc.namespace().unwrap_or_default();
        let secret_name = ssh_secret_name(&cc.name_any());

        if let Some(secret) = self.kube.get_secret(&namespace, &secret_name).await? {
            return secret_value(&secret, SSH_PUBLIC_KEY_FIELD)
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    ControllerError::Reconciliation(format!(
                        "Secret {}/{} has no {}",
                        namespace, secret_name, SSH_PUBLIC_KEY_FIELD
                    ))
                });
        }

        let pair = tokio::task::spawn_blocking(generate_key_pair)
            .await
            .map_err(|e| ControllerError::KeyGeneration(e.to_string()))??;

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.clone()),
                namespace: Some(namespace.clone()),
                labels: cc
                    .owner_cluster_name()
                    .map(|owner| BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), owner)])),
                owner_references: owner_reference(cc).map(|o| vec![o]),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([
                (
                    SSH_PRIVATE_KEY_FIELD.to_string(),
                    ByteString(pair.private_key_openssh.into_bytes()),
                ),
                (
                    SSH_PUBLIC_KEY_FIELD.to_string(),
                    ByteString(pair.public_key_openssh.clone().into_bytes()),
                ),
            ])),
            ..Default::default()
        };
        self.kube.create_secret(&secret).await?;
        info!("Generated SSH key pair in Secret {}/{}", namespace, secret_name);
        Ok(pair.public_key_openssh)
    }

    /// Provider secret mirroring the cluster public key
    async fn ensure_ssh_key(
        &self,
        cc: &ContaboCluster,
        uuid: &str,
        status: &ContaboClusterStatus,
    ) -> Result<SshKeyStatus, ControllerError> {
        let public_key = self.ensure_ssh_key_secret(cc).await?;
        let key_name = format_ssh_key_name(uuid);
        let adopted = |secret_id: i64, name: String| SshKeyStatus {
            secret_id,
            name,
            public_key: public_key.clone(),
        };

        if let Some(recorded) = status.ssh_key.as_ref() {
            match self.contabo.get_secret(recorded.secret_id).await {
                Ok(secret) if same_public_key(&secret.value, &public_key) => {
                    return Ok(adopted(secret.secret_id, secret.name));
                }
                Ok(secret) => {
                    warn!(
                        "Provider secret {} does not match the cluster key, replacing it",
                        secret.secret_id
                    );
                    ignore_not_found(self.contabo.delete_secret(secret.secret_id).await)?;
                }
                Err(e) if e.is_not_found() => {
                    warn!(
                        "Provider secret {} recorded on ContaboCluster {} is gone",
                        recorded.secret_id,
                        cc.name_any()
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        for existing in self.contabo.list_secrets(Some(&key_name), Some(SecretType::Ssh)).await? {
            if existing.name != key_name {
                continue;
            }
            if same_public_key(&existing.value, &public_key) {
                info!("Adopted provider SSH key {} ({})", existing.name, existing.secret_id);
                return Ok(adopted(existing.secret_id, existing.name));
            }
            warn!(
                "Provider secret {} is named {} but holds another key, deleting it",
                existing.secret_id, key_name
            );
            ignore_not_found(self.contabo.delete_secret(existing.secret_id).await)?;
        }

        let created = self
            .contabo
            .create_secret(&CreateSecretRequest {
                name: key_name,
                value: public_key.clone(),
                secret_type: SecretType::Ssh,
            })
            .await?;
        info!("Created provider SSH key {} ({})", created.name, created.secret_id);
        Ok(adopted(created.secret_id, created.name))
    }

    pub(crate) async fn delete_contabo_cluster(
        &self,
        cc: &ContaboCluster,
    ) -> Result<Action, ControllerError> {
        let namespace = cc.namespace().unwrap_or_default();
        let name = cc.name_any();

        if !cc.finalizers().iter().any(|f| f == CLUSTER_FINALIZER) {
            return Ok(Action::await_change());
        }

        info!("Deleting ContaboCluster {}/{}", namespace, name);
        match self.release_cluster_resources(cc).await {
            Ok(()) => {
                self.kube.remove_cluster_finalizer(&namespace, &name).await?;
                self.reset_backoff(&resource_key(cc));
                info!("Released provider resources of ContaboCluster {}/{}", namespace, name);
                Ok(Action::await_change())
            }
            Err(e) => {
                let mut status = cc.status.clone().unwrap_or_default();
                set_condition(
                    &mut status.conditions,
                    Condition::false_(types::READY, reasons::DELETING, condition_message(&e)),
                );
                status.failure_message = Some(condition_message(&e));
                if let Err(pe) = self
                    .kube
                    .patch_contabo_cluster_status(&namespace, &name, &status)
                    .await
                {
                    warn!(
                        "Failed to record deletion failure on ContaboCluster {}/{}: {}",
                        namespace, name, pe
                    );
                }
                error!("ContaboCluster {}/{} deletion failed: {}", namespace, name, e);
                Err(e)
            }
        }
    }

    async fn release_cluster_resources(&self, cc: &ContaboCluster) -> Result<(), ControllerError> {
        let namespace = cc.namespace().unwrap_or_default();
        let name = cc.name_any();
        let uuid = cc.cluster_uuid();

        let network = match (cc.private_network_id(), uuid) {
            (Some(id), _) => match self.contabo.get_private_network(id).await {
                Ok(network) => Some(network),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            },
            (None, Some(uuid)) => {
                let network_name = format_private_network_name(uuid);
                self.contabo
                    .list_private_networks(Some(&network_name))
                    .await?
                    .into_iter()
                    .find(|n| n.name == network_name)
            }
            (None, None) => None,
        };

        if let Some(network) = network {
            let network_id = network.private_network_id;
            for member in &network.instances {
                ignore_not_found(
                    self.contabo
                        .unassign_instance(network_id, member.instance_id)
                        .await,
                )?;
                info!(
                    "Detached instance {} from private network {}",
                    member.instance_id, network_id
                );
            }
            match self.contabo.get_private_network(network_id).await {
                Ok(live) if !live.instances.is_empty() => {
                    warn!(
                        "Private network {} still has {} instance(s) attached, leaving it in place",
                        network_id,
                        live.instances.len()
                    );
                }
                Ok(_) => {
                    ignore_not_found(self.contabo.delete_private_network(network_id).await)?;
                    info!("Deleted private network {}", network_id);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut secret_ids: Vec<i64> = cc.ssh_secret_id().into_iter().collect();
        if let Some(uuid) = uuid {
            let key_name = format_ssh_key_name(uuid);
            secret_ids.extend(
                self.contabo
                    .list_secrets(Some(&key_name), Some(SecretType::Ssh))
                    .await?
                    .into_iter()
                    .filter(|s| s.name == key_name)
                    .map(|s| s.secret_id),
            );
        }
        secret_ids.sort_unstable();
        secret_ids.dedup();
        for secret_id in secret_ids {
            ignore_not_found(self.contabo.delete_secret(secret_id).await)?;
            info!("Deleted provider SSH key {}", secret_id);
        }

        self.kube.delete_secret(&namespace, &ssh_secret_name(&name)).await?;
        endpoints::remove(self.kube.as_ref(), &namespace, &name).await?;
        Ok(())
    }
}
