//! ContaboMachine reconciliation
//!
//! A pass gathers the prerequisites (owner Machine, cluster infrastructure,
//! bootstrap data, index), binds the machine to an instance, then lets the
//! status table decide what the current provider status means for the
//! machine. Progress is recorded as the `InstanceReady` condition reason.

use super::Reconciler;
use crate::error::ControllerError;
use crate::naming::{format_display_name, parse_provider_id};
use crate::reconcile_helpers::{
    condition_message, requeue_secs, resource_key, secret_value, status_needs_update,
};
use crate::status_table::{transition_for, Phase, StatusAction};
use contabo_client::{Instance, InstanceStatus};
use crds::conditions::{find_condition, reasons, set_condition, types};
use crds::{
    Condition, ContaboCluster, ContaboMachine, ContaboMachineStatus, InstanceSnapshot,
    MachineAddress, MachineAddressType, MACHINE_FINALIZER,
};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, error, info};

/// Key of the bootstrap data in the Cluster API bootstrap Secret
pub const BOOTSTRAP_DATA_KEY: &str = "value";

/// Everything a pass needs once the prerequisites are met
pub(crate) struct MachineScope {
    pub namespace: String,
    pub name: String,
    /// Working copy, carries the assigned index and current providerID
    pub machine: ContaboMachine,
    pub cluster: ContaboCluster,
    pub cluster_uuid: String,
    pub index: u32,
    pub bootstrap_data: String,
    pub status: ContaboMachineStatus,
    /// Address on the cluster private network, once known
    pub internal_ip: Option<String>,
    /// Reason and message for `Ready` while not ready, when more specific than the phase
    pub waiting: Option<(&'static str, String)>,
}

impl MachineScope {
    pub fn phase(&self) -> Option<Phase> {
        find_condition(&self.status.conditions, types::INSTANCE_READY)
            .and_then(|c| Phase::from_reason(&c.reason))
    }

    pub fn set_phase(&mut self, phase: Phase, message: impl Into<String>) {
        let condition = if phase == Phase::Ready {
            Condition::true_(types::INSTANCE_READY, phase.as_reason(), message)
        } else {
            Condition::false_(types::INSTANCE_READY, phase.as_reason(), message)
        };
        set_condition(&mut self.status.conditions, condition);
    }

    pub fn set_condition(&mut self, condition: Condition) {
        set_condition(&mut self.status.conditions, condition);
    }

    pub fn wait(&mut self, reason: &'static str, message: impl Into<String>) {
        self.waiting = Some((reason, message.into()));
    }

    pub fn role(&self) -> String {
        self.machine.role()
    }

    pub fn display_name(&self) -> String {
        format_display_name(&self.cluster_uuid, &self.role(), self.index)
    }

    pub fn region(&self) -> String {
        self.machine
            .spec
            .instance
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.cluster.spec.region.clone())
    }

    /// Cluster key, cluster extras, then machine extras; no duplicates
    pub fn ssh_key_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = Vec::new();
        let all = self
            .cluster
            .ssh_secret_id()
            .into_iter()
            .chain(self.cluster.spec.ssh_key.additional_secret_ids.iter().copied())
            .chain(self.machine.spec.ssh_keys.iter().copied());
        for id in all {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Snapshot the instance and rebuild the address list from it
    pub fn record_instance(&mut self, instance: &Instance) {
        self.status.instance = Some(InstanceSnapshot {
            instance_id: instance.instance_id,
            status: instance.status.as_str().to_string(),
            display_name: instance.display_name.clone(),
            ipv4: instance.ip_config.v4.as_ref().map(|v| v.ip.clone()).filter(|ip| !ip.is_empty()),
            ipv6: instance.ip_config.v6.as_ref().map(|v| v.ip.clone()).filter(|ip| !ip.is_empty()),
            error_message: instance.error_message.clone(),
            region: instance.region.clone(),
            product_id: instance.product_id.clone(),
        });

        let mut addresses = vec![MachineAddress::new(
            MachineAddressType::Hostname,
            self.name.clone(),
        )];
        if let Some(ip) = &self.internal_ip {
            addresses.push(MachineAddress::new(MachineAddressType::InternalIP, ip.clone()));
        }
        if let Some(snapshot) = &self.status.instance {
            for ip in snapshot.ipv4.iter().chain(snapshot.ipv6.iter()) {
                addresses.push(MachineAddress::new(MachineAddressType::ExternalIP, ip.clone()));
            }
        }
        self.status.addresses = addresses;
    }

    /// `Ready` mirrors readiness, or names the phase the machine is in
    fn sync_ready_condition(&mut self) {
        let condition = if self.status.ready {
            Condition::true_(types::READY, reasons::READY, "")
        } else if let Some((reason, message)) = &self.waiting {
            Condition::false_(types::READY, *reason, message.clone())
        } else {
            let reason = self.phase().unwrap_or(Phase::NotCreated).as_reason();
            let message = find_condition(&self.status.conditions, types::INSTANCE_READY)
                .map(|c| c.message.clone())
                .unwrap_or_default();
            Condition::false_(types::READY, reason, message)
        };
        self.set_condition(condition);
    }
}

enum Prepared {
    Scope(Box<MachineScope>),
    Wait(Action),
}

fn wait_for(
    status: &mut ContaboMachineStatus,
    reason: &str,
    message: impl Into<String>,
) -> Prepared {
    set_condition(&mut status.conditions, Condition::false_(types::READY, reason, message));
    Prepared::Wait(requeue_secs(10))
}

/// Surface a failed pass on the machine's conditions. A ready machine keeps
/// `Ready` and carries the error on `InstanceReady` instead.
fn record_error(status: &mut ContaboMachineStatus, error: &ControllerError) {
    let message = condition_message(error);
    if let Some(instance_ready) =
        find_condition(&status.conditions, types::INSTANCE_READY).cloned()
    {
        set_condition(
            &mut status.conditions,
            Condition {
                message: message.clone(),
                ..instance_ready
            },
        );
    }
    if !status.ready {
        set_condition(
            &mut status.conditions,
            Condition::false_(types::READY, reasons::RECONCILE_FAILED, message),
        );
    }
}

impl Reconciler {
    pub async fn reconcile_contabo_machine(
        &self,
        cm: &ContaboMachine,
    ) -> Result<Action, ControllerError> {
        let namespace = cm.namespace().unwrap_or_default();
        let name = cm.name_any();

        if cm.metadata.deletion_timestamp.is_some() {
            return self.delete_contabo_machine(cm).await;
        }

        if !cm.finalizers().iter().any(|f| f == MACHINE_FINALIZER) {
            self.kube.add_machine_finalizer(&namespace, &name).await?;
        }

        info!("Reconciling ContaboMachine {}/{}", namespace, name);
        let mut status = cm.status.clone().unwrap_or_default();
        let outcome = match self.prepare_machine(cm, &mut status).await {
            Ok(Prepared::Scope(mut scope)) => {
                scope.status = std::mem::take(&mut status);
                let result = self.reconcile_machine_instance(&mut scope).await;
                if let Err(e) = &result {
                    let phase = scope.phase().unwrap_or(Phase::NotCreated);
                    scope.set_phase(phase, condition_message(e));
                }
                scope.sync_ready_condition();
                status = scope.status;
                result
            }
            Ok(Prepared::Wait(action)) => Ok(action),
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            record_error(&mut status, e);
        }

        let write = if status_needs_update(cm.status.as_ref(), &status) {
            self.kube.patch_contabo_machine_status(&namespace, &name, &status).await
        } else {
            Ok(())
        };

        match (outcome, write) {
            (Err(e), _) => {
                error!("ContaboMachine {}/{} reconcile failed: {}", namespace, name, e);
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
            (Ok(action), Ok(())) => {
                self.reset_backoff(&resource_key(cm));
                Ok(action)
            }
        }
    }

    async fn prepare_machine(
        &self,
        cm: &ContaboMachine,
        status: &mut ContaboMachineStatus,
    ) -> Result<Prepared, ControllerError> {
        let namespace = cm.namespace().unwrap_or_default();
        let name = cm.name_any();

        let Some(owner) = cm.owner_machine_name() else {
            info!("ContaboMachine {}/{} has no owner Machine yet", namespace, name);
            return Ok(wait_for(status, reasons::WAITING_FOR_OWNER, "waiting for an owner Machine"));
        };
        let Some(machine) = self.kube.get_machine(&namespace, &owner).await? else {
            return Ok(wait_for(
                status,
                reasons::WAITING_FOR_OWNER,
                format!("Machine {} not found", owner),
            ));
        };

        let cluster_name = cm.cluster_name()?;
        let Some(cluster) = self.kube.get_cluster(&namespace, &cluster_name).await? else {
            return Ok(wait_for(
                status,
                reasons::WAITING_FOR_CLUSTER,
                format!("Cluster {} not found", cluster_name),
            ));
        };
        if cluster.is_paused() {
            info!(
                "Cluster {}/{} is paused, skipping ContaboMachine {}",
                namespace, cluster_name, name
            );
            return Ok(Prepared::Wait(requeue_secs(30)));
        }

        let infra_name = cluster
            .spec
            .infrastructure_ref
            .as_ref()
            .and_then(|r| r.name.clone())
            .unwrap_or_else(|| cluster_name.clone());
        let Some(contabo_cluster) = self.kube.get_contabo_cluster(&namespace, &infra_name).await?
        else {
            return Ok(wait_for(
                status,
                reasons::WAITING_FOR_CLUSTER,
                format!("ContaboCluster {} not found", infra_name),
            ));
        };
        let cluster_uuid = match contabo_cluster.cluster_uuid() {
            Some(uuid)
                if contabo_cluster.is_ready()
                    && contabo_cluster.private_network_id().is_some()
                    && contabo_cluster.ssh_secret_id().is_some() =>
            {
                uuid.to_string()
            }
            _ => {
                debug!("ContaboCluster {}/{} not ready for machines yet", namespace, infra_name);
                return Ok(wait_for(
                    status,
                    reasons::WAITING_FOR_CLUSTER,
                    format!("ContaboCluster {} is not ready", infra_name),
                ));
            }
        };

        let Some(data_secret) = machine.bootstrap_data_secret() else {
            return Ok(wait_for(
                status,
                reasons::WAITING_FOR_BOOTSTRAP_DATA,
                "bootstrap data secret not set",
            ));
        };
        let bootstrap_data = match self.kube.get_secret(&namespace, data_secret).await? {
            Some(secret) => match secret_value(&secret, BOOTSTRAP_DATA_KEY) {
                Some(data) => data,
                None => {
                    return Ok(wait_for(
                        status,
                        reasons::WAITING_FOR_BOOTSTRAP_DATA,
                        format!("Secret {} has no {}", data_secret, BOOTSTRAP_DATA_KEY),
                    ));
                }
            },
            None => {
                return Ok(wait_for(
                    status,
                    reasons::WAITING_FOR_BOOTSTRAP_DATA,
                    format!("Secret {} not found", data_secret),
                ));
            }
        };

        let mut working = cm.clone();
        let index = match self.allocator.assign_index(self.kube.as_ref(), &mut working).await {
            Ok(index) => index,
            Err(e) => {
                set_condition(
                    &mut status.conditions,
                    Condition::false_(
                        types::INDEX_ASSIGNED,
                        reasons::INDEX_FAILED,
                        condition_message(&e),
                    ),
                );
                return Err(e);
            }
        };
        set_condition(
            &mut status.conditions,
            Condition::true_(
                types::INDEX_ASSIGNED,
                reasons::READY,
                format!("{}-{}", working.role(), index),
            ),
        );

        let internal_ip = status
            .addresses
            .iter()
            .find(|a| a.type_ == MachineAddressType::InternalIP)
            .map(|a| a.address.clone());

        Ok(Prepared::Scope(Box::new(MachineScope {
            namespace,
            name,
            machine: working,
            cluster: contabo_cluster,
            cluster_uuid,
            index,
            bootstrap_data,
            status: ContaboMachineStatus::default(),
            internal_ip,
            waiting: None,
        })))
    }

    async fn reconcile_machine_instance(
        &self,
        scope: &mut MachineScope,
    ) -> Result<Action, ControllerError> {
        let instance = match scope.machine.spec.provider_id.clone() {
            Some(provider_id) => {
                let instance_id = parse_provider_id(&provider_id)?;
                match self.contabo.get_instance(instance_id).await {
                    Ok(instance) => instance,
                    Err(e) if e.is_not_found() => {
                        return self.recover_missing_instance(scope, instance_id).await
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => match self.ensure_instance(scope).await? {
                Some(instance) => instance,
                None => {
                    scope.set_phase(
                        Phase::NotCreated,
                        format!(
                            "no available {} instance in {} and provisioningType is ReuseOnly",
                            scope.machine.spec.instance.product_id,
                            scope.region()
                        ),
                    );
                    scope.wait(reasons::NO_AVAILABLE_INSTANCE, "waiting for an available instance");
                    return Ok(requeue_secs(60));
                }
            },
        };

        scope.record_instance(&instance);
        let transition = transition_for(instance.status, scope.phase());
        debug!(
            "ContaboMachine {}/{}: instance {} is {}, {:?} -> {:?} ({:?})",
            scope.namespace,
            scope.name,
            instance.instance_id,
            instance.status,
            scope.phase(),
            transition.phase,
            transition.action
        );

        // Phase and readiness first; a failed side effect must not leave Ready set
        scope.set_phase(
            transition.phase,
            format!("instance {} is {}", instance.instance_id, instance.status),
        );
        scope.status.ready =
            transition.phase == Phase::Ready && instance.status == InstanceStatus::Running;

        match transition.action {
            StatusAction::Wait => {}
            StatusAction::AttachNetworks => {
                self.attach_private_networks(scope, &instance).await?;
            }
            StatusAction::Boot => {
                self.attach_private_networks(scope, &instance).await?;
                scope.status.bootstrap_started_at = Some(chrono::Utc::now());
            }
            StatusAction::Bootstrap => return self.bootstrap_instance(scope, &instance).await,
            StatusAction::Start => {
                info!(
                    "Starting stopped instance {} of ContaboMachine {}/{}",
                    instance.instance_id, scope.namespace, scope.name
                );
                self.contabo.start_instance(instance.instance_id).await?;
            }
            StatusAction::Fail => {
                let message = instance
                    .error_message
                    .clone()
                    .unwrap_or_else(|| {
                        format!("instance {} is {}", instance.instance_id, instance.status)
                    });
                return self
                    .recover_failed_instance(scope, &instance, reasons::PROVIDER_ERROR, message)
                    .await;
            }
        }

        Ok(Action::requeue(transition.requeue))
    }

    /// Final state of a successful bootstrap
    pub(super) fn mark_ready(&self, scope: &mut MachineScope) {
        scope.status.ready = true;
        scope.status.failing_since = None;
        scope.status.failure_reason = None;
        scope.status.failure_message = None;
        scope.status.ssh_attempts = 0;
        scope.set_phase(Phase::Ready, "");
        scope.set_condition(Condition::true_(
            types::BOOTSTRAP_READY,
            reasons::READY,
            "cloud-init finished",
        ));
        info!("ContaboMachine {}/{} is ready", scope.namespace, scope.name);
    }
}
