//! Failed and vanished instances
//!
//! A failed instance is renamed with the error prefix so it never returns
//! to the available pool, detached from the cluster network and unbound.
//! The next pass binds the machine to a fresh instance.

use super::machine::MachineScope;
use super::Reconciler;
use crate::error::ControllerError;
use crate::naming::format_error_display_name;
use crate::reconcile_helpers::{condition_message, elapsed_since, ignore_not_found, requeue_secs};
use crate::status_table::Phase;
use chrono::Utc;
use contabo_client::Instance;
use crds::conditions::{reasons, types};
use crds::Condition;
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::warn;

/// Failing longer than this slows retries down
pub const FAILURE_ESCALATION: Duration = Duration::from_secs(30 * 60);

impl Reconciler {
    pub(super) async fn recover_failed_instance(
        &self,
        scope: &mut MachineScope,
        instance: &Instance,
        reason: &str,
        message: impl Into<String>,
    ) -> Result<Action, ControllerError> {
        let message = condition_message(message.into());
        let now = Utc::now();
        let since = *scope.status.failing_since.get_or_insert(now);
        warn!(
            "ContaboMachine {}/{}: instance {} failed ({}): {}",
            scope.namespace, scope.name, instance.instance_id, reason, message
        );

        let errored = format_error_display_name(&instance.display_name);
        if instance.display_name != errored {
            self.contabo.set_display_name(instance.instance_id, &errored).await?;
        }
        if let Some(network_id) = scope.cluster.private_network_id() {
            let detached = self
                .contabo
                .unassign_instance(network_id, instance.instance_id)
                .await;
            if let Err(e) = ignore_not_found(detached) {
                warn!(
                    "Failed to detach failed instance {} from private network {}: {}",
                    instance.instance_id, network_id, e
                );
            }
        }
        self.release_binding(scope).await?;

        scope.status.failure_reason = Some(reason.to_string());
        scope.status.failure_message = Some(message.clone());
        scope.set_phase(Phase::Failed, message);

        let escalated = elapsed_since(since, now) > FAILURE_ESCALATION;
        Ok(requeue_secs(if escalated { 300 } else { 60 }))
    }

    /// The bound instance no longer exists at the provider
    pub(super) async fn recover_missing_instance(
        &self,
        scope: &mut MachineScope,
        instance_id: i64,
    ) -> Result<Action, ControllerError> {
        warn!(
            "Instance {} of ContaboMachine {}/{} no longer exists, unbinding",
            instance_id, scope.namespace, scope.name
        );
        scope.status.failing_since.get_or_insert_with(Utc::now);
        self.release_binding(scope).await?;
        scope.set_phase(Phase::NotCreated, format!("instance {} disappeared", instance_id));
        Ok(requeue_secs(10))
    }

    /// Clear `providerID` and everything observed about the old instance
    async fn release_binding(&self, scope: &mut MachineScope) -> Result<(), ControllerError> {
        self.kube.set_machine_provider_id(&scope.namespace, &scope.name, None).await?;
        scope.machine.spec.provider_id = None;
        scope.internal_ip = None;

        let status = &mut scope.status;
        status.ready = false;
        status.instance = None;
        status.addresses.clear();
        status.ssh_attempts = 0;
        status.bootstrap_started_at = None;
        scope.set_condition(Condition::false_(
            types::BOOTSTRAP_READY,
            reasons::WAITING,
            "no instance",
        ));
        scope.set_condition(Condition::false_(
            types::PRIVATE_NETWORK_ATTACHED,
            reasons::WAITING,
            "no instance",
        ));
        Ok(())
    }
}
