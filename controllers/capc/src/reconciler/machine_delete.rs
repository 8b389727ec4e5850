//! ContaboMachine deletion: the instance goes back to the available pool
//!
//! Instances are never cancelled. Deletion stops the instance, detaches it
//! from every private network and clears its display name.

use super::Reconciler;
use crate::error::ControllerError;
use crate::naming::{classify_display_name, format_display_name, parse_provider_id, InstanceClaim};
use crate::reconcile_helpers::{
    condition_message, elapsed_since, ignore_not_found, requeue_secs, resource_key,
};
use chrono::Utc;
use contabo_client::InstanceStatus;
use crds::conditions::{reasons, set_condition, types};
use crds::{Condition, ContaboMachine, MACHINE_FINALIZER};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{info, warn};

/// Release failures are retried this long before the finalizer is dropped anyway
pub const DELETION_GRACE: Duration = Duration::from_secs(30 * 60);

impl Reconciler {
    pub(crate) async fn delete_contabo_machine(
        &self,
        cm: &ContaboMachine,
    ) -> Result<Action, ControllerError> {
        let namespace = cm.namespace().unwrap_or_default();
        let name = cm.name_any();

        if !cm.finalizers().iter().any(|f| f == MACHINE_FINALIZER) {
            return Ok(Action::await_change());
        }

        info!("Deleting ContaboMachine {}/{}", namespace, name);
        match self.release_instance(cm).await {
            Ok(()) => {
                self.kube.remove_machine_finalizer(&namespace, &name).await?;
                self.reset_backoff(&resource_key(cm));
                info!("ContaboMachine {}/{} deleted", namespace, name);
                Ok(Action::await_change())
            }
            Err(e) => {
                let mut status = cm.status.clone().unwrap_or_default();
                let now = Utc::now();
                let since = *status.deletion_failing_since.get_or_insert(now);
                if elapsed_since(since, now) > DELETION_GRACE {
                    warn!(
                        "Giving up on the instance of {}/{} after 30m, removing finalizer: {}",
                        namespace, name, e
                    );
                    self.kube.remove_machine_finalizer(&namespace, &name).await?;
                    return Ok(Action::await_change());
                }

                warn!("Failed to release instance of ContaboMachine {}/{}: {}", namespace, name, e);
                set_condition(
                    &mut status.conditions,
                    Condition::false_(types::READY, reasons::DELETING, condition_message(&e)),
                );
                if let Err(patch_err) = self
                    .kube
                    .patch_contabo_machine_status(&namespace, &name, &status)
                    .await
                {
                    warn!(
                        "Failed to record deletion failure on {}/{}: {}",
                        namespace, name, patch_err
                    );
                }
                Ok(requeue_secs(30))
            }
        }
    }

    async fn release_instance(&self, cm: &ContaboMachine) -> Result<(), ControllerError> {
        let instance_id = match cm.spec.provider_id.as_deref() {
            Some(provider_id) => parse_provider_id(provider_id)?,
            None => match cm.instance_id() {
                Some(id) => id,
                None => return Ok(()),
            },
        };

        let instance = match self.contabo.get_instance(instance_id).await {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => {
                info!("Instance {} already gone", instance_id);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match classify_display_name(&instance.display_name) {
            InstanceClaim::Errored | InstanceClaim::Foreign => {
                info!(
                    "Instance {} is named {:?}, leaving it as is",
                    instance_id, instance.display_name
                );
                return Ok(());
            }
            InstanceClaim::Claimed { machine, .. } => {
                let expected = match (cm.spec.index, self.machine_cluster_uuid(cm).await) {
                    (Some(index), Some(uuid)) => {
                        Some(format_display_name(&uuid, &cm.role(), index) == instance.display_name)
                    }
                    (Some(index), None) => Some(machine == format!("{}-{}", cm.role(), index)),
                    (None, _) => None,
                };
                if expected != Some(true) {
                    info!(
                        "Instance {} is claimed as {:?}, not by {}/{}; leaving it as is",
                        instance_id,
                        instance.display_name,
                        cm.namespace().unwrap_or_default(),
                        cm.name_any()
                    );
                    return Ok(());
                }
            }
            InstanceClaim::Available => {}
        }

        if instance.status != InstanceStatus::Stopped {
            ignore_not_found(self.contabo.stop_instance(instance_id).await)?;
        }

        for network in self.contabo.list_private_networks(None).await? {
            if network.has_instance(instance_id) {
                ignore_not_found(
                    self.contabo
                        .unassign_instance(network.private_network_id, instance_id)
                        .await,
                )?;
                info!("Detached instance {} from private network {}", instance_id, network.name);
            }
        }

        ignore_not_found(self.contabo.set_display_name(instance_id, "").await)?;
        info!("Returned instance {} to the available pool", instance_id);
        Ok(())
    }

    /// UUID of the machine's ContaboCluster; None once the cluster is gone
    async fn machine_cluster_uuid(&self, cm: &ContaboMachine) -> Option<String> {
        let namespace = cm.namespace().unwrap_or_default();
        let cluster_name = cm.cluster_name().ok()?;
        let owner = self.kube.get_cluster(&namespace, &cluster_name).await;
        let infra_name = match owner {
            Ok(Some(cluster)) => cluster
                .spec
                .infrastructure_ref
                .as_ref()
                .and_then(|r| r.name.clone())
                .unwrap_or(cluster_name),
            Ok(None) => cluster_name,
            Err(e) => {
                warn!("Failed to read Cluster {}/{}: {}", namespace, cluster_name, e);
                cluster_name
            }
        };
        match self.kube.get_contabo_cluster(&namespace, &infra_name).await {
            Ok(contabo_cluster) => contabo_cluster?.cluster_uuid().map(str::to_string),
            Err(e) => {
                warn!("Failed to read ContaboCluster {}/{}: {}", namespace, infra_name, e);
                None
            }
        }
    }
}
