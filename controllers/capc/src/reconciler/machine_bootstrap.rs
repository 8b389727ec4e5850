//! Private network attachment and bootstrap probing of a running instance

use super::cluster::SSH_PRIVATE_KEY_FIELD;
use super::machine::MachineScope;
use super::Reconciler;
use crate::error::ControllerError;
use crate::naming::ssh_secret_name;
use crate::reconcile_helpers::{condition_message, elapsed_since, requeue_secs, secret_value};
use crate::ssh::{
    parse_cloud_init_status, CloudInitState, SshTarget, CLOUD_INIT_STATUS_COMMAND, SSH_PORT,
};
use crate::status_table::Phase;
use chrono::Utc;
use contabo_client::{ContaboError, Instance, PrivateNetworkInstance};
use crds::conditions::{reasons, types};
use crds::Condition;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound for cloud-init after the instance first reported running
pub const CLOUD_INIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Consecutive failed logins before probing slows down
pub const SSH_ATTEMPTS: u32 = 10;

impl Reconciler {
    /// Attach the instance to the cluster network and any named networks
    ///
    /// Membership is confirmed by reading each network back. The private
    /// address on the cluster network becomes the machine's InternalIP.
    pub(super) async fn attach_private_networks(
        &self,
        scope: &mut MachineScope,
        instance: &Instance,
    ) -> Result<(), ControllerError> {
        match self.resolve_network_ids(scope).await {
            Ok(network_ids) => {
                for (position, network_id) in network_ids.iter().enumerate() {
                    let member = match self
                        .attach_network(*network_id, instance.instance_id)
                        .await
                    {
                        Ok(member) => member,
                        Err(e) => {
                            scope.set_condition(Condition::false_(
                                types::PRIVATE_NETWORK_ATTACHED,
                                reasons::ATTACH_FAILED,
                                condition_message(&e),
                            ));
                            return Err(e);
                        }
                    };
                    if position == 0 {
                        scope.internal_ip = member.private_ipv4().map(str::to_string);
                    }
                }
                scope.set_condition(Condition::true_(
                    types::PRIVATE_NETWORK_ATTACHED,
                    reasons::READY,
                    format!("attached to {} private network(s)", network_ids.len()),
                ));
                scope.record_instance(instance);
                Ok(())
            }
            Err(e) => {
                scope.set_condition(Condition::false_(
                    types::PRIVATE_NETWORK_ATTACHED,
                    reasons::ATTACH_FAILED,
                    condition_message(&e),
                ));
                Err(e)
            }
        }
    }

    /// Cluster network first, then the machine's extra networks by exact name
    async fn resolve_network_ids(&self, scope: &MachineScope) -> Result<Vec<i64>, ControllerError> {
        let cluster_network = scope.cluster.private_network_id().ok_or_else(|| {
            ControllerError::Reconciliation(format!(
                "ContaboCluster {} has no private network",
                scope.cluster.name_any()
            ))
        })?;
        let mut ids = vec![cluster_network];
        for name in &scope.machine.spec.private_networks {
            let network = self
                .contabo
                .list_private_networks(Some(name))
                .await?
                .into_iter()
                .find(|n| &n.name == name)
                .ok_or_else(|| {
                    ControllerError::Reconciliation(format!("private network {:?} not found", name))
                })?;
            if !ids.contains(&network.private_network_id) {
                ids.push(network.private_network_id);
            }
        }
        Ok(ids)
    }

    async fn attach_network(
        &self,
        network_id: i64,
        instance_id: i64,
    ) -> Result<PrivateNetworkInstance, ControllerError> {
        let network = self.contabo.get_private_network(network_id).await?;
        if let Some(member) = network.instance(instance_id) {
            return Ok(member.clone());
        }

        match self.contabo.assign_instance(network_id, instance_id).await {
            Ok(()) => info!("Assigned instance {} to private network {}", instance_id, network_id),
            Err(ContaboError::Api { status: 409, .. }) => {
                debug!(
                    "Instance {} already assigned to private network {}",
                    instance_id, network_id
                )
            }
            Err(e) => return Err(e.into()),
        }

        let network = self.contabo.get_private_network(network_id).await?;
        network.instance(instance_id).cloned().ok_or_else(|| {
            ControllerError::Reconciliation(format!(
                "instance {} is not a member of private network {} after assignment",
                instance_id, network_id
            ))
        })
    }

    /// One SSH check of a running instance
    pub(super) async fn bootstrap_instance(
        &self,
        scope: &mut MachineScope,
        instance: &Instance,
    ) -> Result<Action, ControllerError> {
        self.attach_private_networks(scope, instance).await?;

        let now = Utc::now();
        let started = *scope.status.bootstrap_started_at.get_or_insert(now);
        if elapsed_since(started, now) > CLOUD_INIT_TIMEOUT {
            return self
                .recover_failed_instance(
                    scope,
                    instance,
                    reasons::CLOUD_INIT_FAILED,
                    "cloud-init did not finish within 30 minutes",
                )
                .await;
        }
        scope.set_phase(Phase::Bootstrapping, "waiting for cloud-init");
        scope.status.ready = false;

        let Some(host) = scope.status.instance.as_ref().and_then(|i| i.ipv4.clone()) else {
            scope.set_condition(Condition::false_(
                types::BOOTSTRAP_READY,
                reasons::SSH_UNREACHABLE,
                "instance has no public IPv4 address yet",
            ));
            return Ok(requeue_secs(10));
        };

        let secret_name = ssh_secret_name(&scope.cluster.name_any());
        let private_key_pem = self
            .kube
            .get_secret(&scope.namespace, &secret_name)
            .await?
            .and_then(|s| secret_value(&s, SSH_PRIVATE_KEY_FIELD))
            .ok_or_else(|| {
                ControllerError::Reconciliation(format!(
                    "SSH key Secret {} has no {}",
                    secret_name, SSH_PRIVATE_KEY_FIELD
                ))
            })?;

        let target = SshTarget {
            host,
            port: SSH_PORT,
            user: scope.machine.spec.instance.default_user.clone(),
            private_key_pem,
        };

        match self.shell.run(&target, CLOUD_INIT_STATUS_COMMAND).await {
            Err(e) => {
                scope.status.ssh_attempts += 1;
                let attempts = scope.status.ssh_attempts;
                warn!(
                    "SSH check {} of ContaboMachine {}/{} ({:?}) failed: {}",
                    attempts, scope.namespace, scope.name, target, e
                );
                let message = condition_message(format!("attempt {}: {}", attempts, e));
                scope.set_condition(Condition::false_(
                    types::BOOTSTRAP_READY,
                    reasons::SSH_UNREACHABLE,
                    message.clone(),
                ));
                scope.wait(reasons::SSH_UNREACHABLE, message);
                Ok(requeue_secs(if attempts < SSH_ATTEMPTS { 5 } else { 60 }))
            }
            Ok(output) => {
                scope.status.ssh_attempts = 0;
                match parse_cloud_init_status(&output) {
                    CloudInitState::Done => {
                        self.mark_ready(scope);
                        Ok(requeue_secs(300))
                    }
                    CloudInitState::Running | CloudInitState::Unknown(_) => {
                        debug!(
                            "cloud-init still running on ContaboMachine {}/{}",
                            scope.namespace, scope.name
                        );
                        scope.set_condition(Condition::false_(
                            types::BOOTSTRAP_READY,
                            reasons::CLOUD_INIT_RUNNING,
                            "cloud-init is running",
                        ));
                        scope.wait(reasons::CLOUD_INIT_RUNNING, "cloud-init is running");
                        Ok(requeue_secs(10))
                    }
                    CloudInitState::Error(detail) => {
                        self.recover_failed_instance(
                            scope,
                            instance,
                            reasons::CLOUD_INIT_FAILED,
                            format!("cloud-init failed: {}", detail),
                        )
                        .await
                    }
                }
            }
        }
    }
}
