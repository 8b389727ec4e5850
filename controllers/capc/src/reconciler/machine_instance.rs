//! Binding a ContaboMachine to an instance
//!
//! Order of preference: an instance already carrying this machine's display
//! name, then an available instance of the same product and region, then a
//! new one. Claiming goes through the display name, so a rename is verified
//! by reading the instance back before anything destructive happens.

use super::machine::MachineScope;
use super::Reconciler;
use crate::error::ControllerError;
use crate::naming::{build_provider_id, classify_display_name, InstanceClaim};
use crate::status_table::is_terminal;
use contabo_client::{
    CreateInstanceRequest, Instance, InstanceFilter, InstanceStatus, ReinstallInstanceRequest,
};
use crds::ProvisioningType;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Instance bound to the machine, or None when ReuseOnly found nothing
    pub(super) async fn ensure_instance(
        &self,
        scope: &mut MachineScope,
    ) -> Result<Option<Instance>, ControllerError> {
        let display_name = scope.display_name();

        let filter = InstanceFilter {
            display_name: Some(display_name.clone()),
            ..Default::default()
        };
        let adopted = self
            .contabo
            .list_instances(&filter)
            .await?
            .into_iter()
            .filter(|i| i.display_name == display_name)
            .min_by_key(|i| i.instance_id);
        if let Some(instance) = adopted {
            info!(
                "Adopting instance {} already named {:?} for ContaboMachine {}/{}",
                instance.instance_id, display_name, scope.namespace, scope.name
            );
            self.bind_instance(scope, instance.instance_id).await?;
            return Ok(Some(instance));
        }

        if let Some(instance) = self.reuse_available_instance(scope, &display_name).await? {
            self.bind_instance(scope, instance.instance_id).await?;
            return Ok(Some(instance));
        }

        if scope.machine.spec.instance.provisioning_type == ProvisioningType::ReuseOnly {
            info!(
                "No available instance for ContaboMachine {}/{} and provisioningType is ReuseOnly",
                scope.namespace, scope.name
            );
            return Ok(None);
        }

        let spec = scope.machine.spec.instance.clone();
        let request = CreateInstanceRequest {
            image_id: Some(spec.image_id.clone()),
            product_id: spec.product_id,
            region: scope.region(),
            ssh_keys: scope.ssh_key_ids(),
            user_data: Some(scope.bootstrap_data.clone()),
            display_name: Some(display_name.clone()),
            default_user: Some(spec.default_user),
            period: 1,
        };
        let created = self.contabo.create_instance(&request).await?;
        info!(
            "Created instance {} ({} in {}) for ContaboMachine {}/{}",
            created.instance_id, request.product_id, request.region, scope.namespace, scope.name
        );
        self.bind_instance(scope, created.instance_id).await?;

        // Freshly created instances can lag behind in reads; work from the request
        Ok(Some(Instance {
            instance_id: created.instance_id,
            display_name,
            region: request.region,
            product_id: request.product_id,
            image_id: spec.image_id,
            status: created.status.unwrap_or(InstanceStatus::Provisioning),
            ..Default::default()
        }))
    }

    /// Claim and reinstall the lowest-id available instance that fits
    async fn reuse_available_instance(
        &self,
        scope: &MachineScope,
        display_name: &str,
    ) -> Result<Option<Instance>, ControllerError> {
        let region = scope.region();
        let spec = &scope.machine.spec.instance;
        let filter = InstanceFilter {
            region: Some(region.clone()),
            product_ids: vec![spec.product_id.clone()],
            ..Default::default()
        };

        let mut candidates: Vec<Instance> = self
            .contabo
            .list_instances(&filter)
            .await?
            .into_iter()
            .filter(|i| classify_display_name(&i.display_name) == InstanceClaim::Available)
            .filter(|i| !is_terminal(i.status))
            .filter(|i| i.region == region && i.product_id == spec.product_id)
            .collect();
        candidates.sort_by_key(|i| i.instance_id);
        debug!(
            "{} reusable {} instance(s) in {} for ContaboMachine {}/{}",
            candidates.len(),
            spec.product_id,
            region,
            scope.namespace,
            scope.name
        );

        for candidate in candidates {
            let instance_id = candidate.instance_id;
            self.contabo.set_display_name(instance_id, display_name).await?;
            let claimed = self.contabo.get_instance(instance_id).await?;
            if claimed.display_name != display_name {
                info!(
                    "Instance {} was claimed as {:?} in the meantime, trying the next one",
                    instance_id, claimed.display_name
                );
                continue;
            }

            let request = ReinstallInstanceRequest {
                image_id: spec.image_id.clone(),
                ssh_keys: scope.ssh_key_ids(),
                user_data: Some(scope.bootstrap_data.clone()),
                default_user: Some(spec.default_user.clone()),
            };
            if let Err(e) = self.contabo.reinstall_instance(instance_id, &request).await {
                warn!("Reinstall of instance {} failed, releasing it: {}", instance_id, e);
                if let Err(release) = self.contabo.set_display_name(instance_id, "").await {
                    warn!("Failed to release instance {}: {}", instance_id, release);
                }
                return Err(e.into());
            }
            info!(
                "Reusing instance {} for ContaboMachine {}/{}, reinstalling with image {}",
                instance_id, scope.namespace, scope.name, spec.image_id
            );

            let mut instance = self.contabo.get_instance(instance_id).await?;
            if matches!(instance.status, InstanceStatus::Running | InstanceStatus::Stopped) {
                // Reads right after a reinstall can still report the previous install
                instance.status = InstanceStatus::Provisioning;
            }
            return Ok(Some(instance));
        }
        Ok(None)
    }

    /// Persist `providerID` before anything else depends on the binding
    async fn bind_instance(
        &self,
        scope: &mut MachineScope,
        instance_id: i64,
    ) -> Result<(), ControllerError> {
        let provider_id = build_provider_id(instance_id);
        self.kube
            .set_machine_provider_id(&scope.namespace, &scope.name, Some(&provider_id))
            .await?;
        info!("ContaboMachine {}/{} bound to {}", scope.namespace, scope.name, provider_id);
        scope.machine.spec.provider_id = Some(provider_id);
        scope.status.bootstrap_started_at = None;
        scope.status.ssh_attempts = 0;
        Ok(())
    }
}
