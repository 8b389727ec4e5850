//! Unit tests for the ContaboMachine reconciler

#[cfg(test)]
mod tests {
    use crate::kube_client::KubeClient;
    use crate::naming::{build_provider_id, format_display_name, parse_provider_id};
    use crate::reconcile_helpers::requeue_secs;
    use crate::status_table::Phase;
    use crate::test_utils::*;
    use contabo_client::{InstanceAction, InstanceStatus};
    use crds::conditions::{find_condition, is_condition_true, reasons, types};
    use crds::*;
    use kube::ResourceExt;
    use kube_runtime::controller::Action;
    use std::time::Duration;

    const CLUSTER: &str = "prod";
    const CP: &str = "prod-cp-a";

    fn env_with_control_plane() -> TestEnv {
        let env = TestEnv::with_ready_cluster(CLUSTER);
        env.add_machine(control_plane_machine(CLUSTER, CP));
        env
    }

    fn bound_instance_id(env: &TestEnv, name: &str) -> Option<i64> {
        env.machine(name)
            .spec
            .provider_id
            .as_deref()
            .map(|p| parse_provider_id(p).unwrap())
    }

    fn status(env: &TestEnv, name: &str) -> ContaboMachineStatus {
        env.machine(name).status.unwrap_or_default()
    }

    fn phase(env: &TestEnv, name: &str) -> Option<Phase> {
        env.machine(name).phase().and_then(Phase::from_reason)
    }

    /// Create, boot and bootstrap; returns the bound instance id
    async fn drive_to_ready(env: &TestEnv, name: &str) -> i64 {
        env.reconcile_machine(name).await.unwrap();
        let id = bound_instance_id(env, name).expect("bound after first pass");
        env.contabo.set_instance_status(id, InstanceStatus::Running);
        env.reconcile_machine(name).await.unwrap();
        env.reconcile_machine(name).await.unwrap();
        assert!(status(env, name).ready, "machine should be ready");
        id
    }

    #[tokio::test]
    async fn test_reuses_lowest_available_instance() {
        let env = env_with_control_plane();
        env.contabo.add_instance(instance(8, "", InstanceStatus::Running));
        env.contabo.add_instance(instance(7, "", InstanceStatus::Stopped));
        env.contabo.add_instance(instance(3, "someone else's", InstanceStatus::Running));
        env.contabo.add_instance(instance(2, "[capc-error] old", InstanceStatus::Stopped));

        env.reconcile_machine(CP).await.unwrap();

        let machine = env.machine(CP);
        assert_eq!(machine.spec.provider_id, Some(build_provider_id(7)));
        assert_eq!(machine.spec.index, Some(0));
        assert_eq!(env.contabo.call_count("create_instance"), 0);

        let reused = env.contabo.instance(7).unwrap();
        assert_eq!(reused.display_name, format_display_name(CLUSTER_UUID, "control-plane", 0));
        let reinstalls = env.contabo.reinstalls();
        assert_eq!(reinstalls.len(), 1);
        let (id, request) = &reinstalls[0];
        assert_eq!(*id, 7);
        assert_eq!(request.image_id, IMAGE);
        assert_eq!(request.ssh_keys, vec![SSH_SECRET_ID]);
        assert!(request.user_data.as_deref().unwrap().starts_with("#cloud-config"));
        assert_eq!(env.contabo.instance(8).unwrap().display_name, "");
    }

    #[tokio::test]
    async fn test_instance_renamed_by_someone_else_is_skipped() {
        let env = env_with_control_plane();
        env.contabo.add_instance(instance(7, "", InstanceStatus::Stopped));
        env.contabo.add_instance(instance(8, "", InstanceStatus::Stopped));
        env.contabo.rename_after_next_claim(7, "[capc] other-uuid control-plane-0");

        env.reconcile_machine(CP).await.unwrap();

        assert_eq!(bound_instance_id(&env, CP), Some(8));
        assert_eq!(
            env.contabo.instance(7).unwrap().display_name,
            "[capc] other-uuid control-plane-0"
        );
        assert_eq!(
            env.contabo.instance(8).unwrap().display_name,
            format_display_name(CLUSTER_UUID, "control-plane", 0)
        );
        let reinstalled: Vec<i64> = env.contabo.reinstalls().iter().map(|(id, _)| *id).collect();
        assert_eq!(reinstalled, vec![8]);
        assert_eq!(env.contabo.call_count("create_instance"), 0);
    }

    #[tokio::test]
    async fn test_failed_reinstall_releases_the_claim() {
        let env = env_with_control_plane();
        env.contabo.add_instance(instance(7, "", InstanceStatus::Stopped));
        env.contabo.fail_operation("reinstall_instance");

        assert!(env.reconcile_machine(CP).await.is_err());

        assert_eq!(env.contabo.instance(7).unwrap().display_name, "");
        assert!(env.machine(CP).spec.provider_id.is_none());
        assert_eq!(env.contabo.call_count("create_instance"), 0);
        let ready = find_condition(&status(&env, CP).conditions, types::READY).cloned().unwrap();
        assert_eq!(ready.reason, reasons::RECONCILE_FAILED);
        assert!(ready.message.contains("reinstall_instance"));

        env.contabo.clear_failures();
        env.reconcile_machine(CP).await.unwrap();
        assert_eq!(bound_instance_id(&env, CP), Some(7));
    }

    #[tokio::test]
    async fn test_create_failure_is_recorded_on_conditions() {
        let env = env_with_control_plane();
        env.contabo.fail_operation("create_instance");

        assert!(env.reconcile_machine(CP).await.is_err());

        let status = status(&env, CP);
        assert!(!status.ready);
        let ready = find_condition(&status.conditions, types::READY).unwrap();
        assert_eq!(ready.reason, reasons::RECONCILE_FAILED);
        assert!(ready.message.contains("create_instance failed (injected)"));
        let instance_ready = find_condition(&status.conditions, types::INSTANCE_READY).unwrap();
        assert_eq!(instance_ready.reason, Phase::NotCreated.as_reason());
        assert!(instance_ready.message.contains("create_instance"));

        env.contabo.clear_failures();
        env.reconcile_machine(CP).await.unwrap();
        let ready = find_condition(&self::status(&env, CP).conditions, types::READY).cloned().unwrap();
        assert_ne!(ready.reason, reasons::RECONCILE_FAILED);
    }

    #[tokio::test]
    async fn test_creates_when_pool_is_empty() {
        let env = env_with_control_plane();
        env.contabo.add_instance(instance(9, "", InstanceStatus::Error));

        env.reconcile_machine(CP).await.unwrap();

        let created = env.contabo.created_instances();
        assert_eq!(created.len(), 1);
        let request = &created[0];
        assert_eq!(request.product_id, PRODUCT);
        assert_eq!(request.region, DEFAULT_REGION);
        assert_eq!(request.period, 1);
        assert_eq!(
            request.display_name.as_deref(),
            Some(format_display_name(CLUSTER_UUID, "control-plane", 0).as_str())
        );
        assert!(bound_instance_id(&env, CP).is_some_and(|id| id != 9));
    }

    #[tokio::test]
    async fn test_provisioning_sequence_becomes_ready_once() {
        let env = env_with_control_plane();
        env.reconcile_machine(CP).await.unwrap();
        let id = bound_instance_id(&env, CP).unwrap();

        let sequence = [
            InstanceStatus::Creating,
            InstanceStatus::Provisioning,
            InstanceStatus::Installing,
            InstanceStatus::Provisioning,
            InstanceStatus::Installing,
            InstanceStatus::Running,
        ];
        for observed in sequence {
            env.contabo.set_instance_status(id, observed);
            env.reconcile_machine(CP).await.unwrap();
            assert!(!status(&env, CP).ready, "not ready while {}", observed);
        }
        assert_eq!(phase(&env, CP), Some(Phase::Booting));
        assert_eq!(env.shell.calls(), 0);

        let action = env.reconcile_machine(CP).await.unwrap();

        assert_eq!(action, requeue_secs(300));
        let status = status(&env, CP);
        assert!(status.ready);
        assert!(is_condition_true(&status.conditions, types::READY));
        assert!(is_condition_true(&status.conditions, types::BOOTSTRAP_READY));
        assert_eq!(env.shell.calls(), 1);
        assert_eq!(env.contabo.call_count("create_instance"), 1);
        assert_eq!(env.contabo.call_count("assign_instance"), 1);
        assert_eq!(bound_instance_id(&env, CP), Some(id));

        let target = env.shell.last_target().unwrap();
        assert_eq!(target.user, "admin");
        assert_eq!(
            Some(target.host.clone()),
            status.instance.as_ref().and_then(|i| i.ipv4.clone())
        );

        let internal: Vec<_> = status
            .addresses
            .iter()
            .filter(|a| a.type_ == MachineAddressType::InternalIP)
            .collect();
        assert_eq!(internal.len(), 1);
        assert!(internal[0].address.starts_with("10.0."));
        assert!(status.addresses.iter().any(|a| a.type_ == MachineAddressType::ExternalIP));
        assert!(status
            .addresses
            .iter()
            .any(|a| a.type_ == MachineAddressType::Hostname && a.address == CP));
    }

    #[tokio::test]
    async fn test_ready_machine_is_left_alone() {
        let env = env_with_control_plane();
        drive_to_ready(&env, CP).await;

        let action = env.reconcile_machine(CP).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert_eq!(env.shell.calls(), 1);
        assert!(status(&env, CP).ready);
    }

    #[tokio::test]
    async fn test_stopped_instance_is_started() {
        let env = env_with_control_plane();
        let id = drive_to_ready(&env, CP).await;
        env.contabo.set_instance_status(id, InstanceStatus::Stopped);

        env.reconcile_machine(CP).await.unwrap();

        assert!(env
            .contabo
            .actions()
            .iter()
            .any(|(i, a)| *i == id && *a == InstanceAction::Start));
        assert!(!status(&env, CP).ready);
    }

    #[tokio::test]
    async fn test_stopped_machine_is_not_ready_until_it_boots_again() {
        let env = env_with_control_plane();
        let id = drive_to_ready(&env, CP).await;
        env.contabo.set_instance_status(id, InstanceStatus::Stopped);
        env.contabo.fail_operation("start_instance");

        assert!(env.reconcile_machine(CP).await.is_err());

        let stopped = status(&env, CP);
        assert!(!stopped.ready);
        assert_eq!(phase(&env, CP), Some(Phase::Provisioning));
        let ready = find_condition(&stopped.conditions, types::READY).unwrap();
        assert_eq!(ready.reason, reasons::RECONCILE_FAILED);
        assert!(ready.message.contains("start_instance"));

        env.contabo.clear_failures();
        env.contabo.set_instance_status(id, InstanceStatus::Running);
        env.reconcile_machine(CP).await.unwrap();
        assert_eq!(phase(&env, CP), Some(Phase::Booting));
        assert!(!status(&env, CP).ready);

        env.reconcile_machine(CP).await.unwrap();
        assert!(status(&env, CP).ready);
        assert_eq!(phase(&env, CP), Some(Phase::Ready));
        assert_eq!(env.shell.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_instance_is_replaced() {
        let env = env_with_control_plane();
        let failed_id = drive_to_ready(&env, CP).await;
        env.contabo.set_instance_status(failed_id, InstanceStatus::Error);

        let action = env.reconcile_machine(CP).await.unwrap();

        assert_eq!(action, requeue_secs(60));
        let machine = env.machine(CP);
        assert!(machine.spec.provider_id.is_none());
        let status = machine.status.unwrap();
        assert!(!status.ready);
        assert!(status.instance.is_none());
        assert!(status.failing_since.is_some());
        assert_eq!(status.failure_reason.as_deref(), Some(reasons::PROVIDER_ERROR));
        let errored = env.contabo.instance(failed_id).unwrap();
        assert!(errored.display_name.contains("error"));
        assert!(!env.contabo.private_networks()[0].has_instance(failed_id));

        env.reconcile_machine(CP).await.unwrap();

        assert_eq!(env.contabo.call_count("create_instance"), 2);
        let replacement = bound_instance_id(&env, CP).unwrap();
        assert_ne!(replacement, failed_id);
    }

    #[tokio::test]
    async fn test_cloud_init_error_fails_the_instance() {
        let env = env_with_control_plane();
        env.reconcile_machine(CP).await.unwrap();
        let id = bound_instance_id(&env, CP).unwrap();
        env.contabo.set_instance_status(id, InstanceStatus::Running);
        env.reconcile_machine(CP).await.unwrap();
        env.shell.push_output("status: error\n");

        env.reconcile_machine(CP).await.unwrap();

        let status = status(&env, CP);
        assert_eq!(status.failure_reason.as_deref(), Some(reasons::CLOUD_INIT_FAILED));
        assert_eq!(phase(&env, CP), Some(Phase::Failed));
        assert!(env.contabo.instance(id).unwrap().display_name.starts_with("[capc-error]"));
    }

    #[tokio::test]
    async fn test_ssh_failures_are_counted() {
        let env = env_with_control_plane();
        env.reconcile_machine(CP).await.unwrap();
        let id = bound_instance_id(&env, CP).unwrap();
        env.contabo.set_instance_status(id, InstanceStatus::Running);
        env.reconcile_machine(CP).await.unwrap();

        for attempt in 1..=3 {
            env.shell.push_error("connection refused");
            let action = env.reconcile_machine(CP).await.unwrap();
            assert_eq!(action, requeue_secs(5));
            let status = status(&env, CP);
            assert_eq!(status.ssh_attempts, attempt);
            let bootstrap = find_condition(&status.conditions, types::BOOTSTRAP_READY).unwrap();
            assert_eq!(bootstrap.reason, reasons::SSH_UNREACHABLE);
            let ready = find_condition(&status.conditions, types::READY).unwrap();
            assert_eq!(ready.reason, reasons::SSH_UNREACHABLE);
        }

        env.shell.push_output("status: running\n");
        assert_eq!(env.reconcile_machine(CP).await.unwrap(), requeue_secs(10));
        assert_eq!(status(&env, CP).ssh_attempts, 0);

        env.reconcile_machine(CP).await.unwrap();
        assert!(status(&env, CP).ready);
        assert_eq!(env.shell.calls(), 5);
    }

    #[tokio::test]
    async fn test_vanished_instance_is_unbound() {
        let env = env_with_control_plane();
        env.reconcile_machine(CP).await.unwrap();
        let id = bound_instance_id(&env, CP).unwrap();
        env.contabo.remove_instance(id);

        let action = env.reconcile_machine(CP).await.unwrap();

        assert_eq!(action, requeue_secs(10));
        assert!(env.machine(CP).spec.provider_id.is_none());
        assert_eq!(phase(&env, CP), Some(Phase::NotCreated));

        env.reconcile_machine(CP).await.unwrap();
        assert_eq!(env.contabo.call_count("create_instance"), 2);
    }

    #[tokio::test]
    async fn test_reuse_only_waits_for_pool() {
        let env = TestEnv::with_ready_cluster(CLUSTER);
        let mut machine = worker_machine(CLUSTER, "prod-md-0-a");
        machine.spec.instance.provisioning_type = ProvisioningType::ReuseOnly;
        env.add_machine(machine);

        let action = env.reconcile_machine("prod-md-0-a").await.unwrap();

        assert_eq!(action, requeue_secs(60));
        assert_eq!(env.contabo.call_count("create_instance"), 0);
        let status = status(&env, "prod-md-0-a");
        let ready = find_condition(&status.conditions, types::READY).unwrap();
        assert_eq!(ready.reason, reasons::NO_AVAILABLE_INSTANCE);

        env.contabo.add_instance(instance(11, "", InstanceStatus::Stopped));
        env.reconcile_machine("prod-md-0-a").await.unwrap();
        assert_eq!(bound_instance_id(&env, "prod-md-0-a"), Some(11));
        assert_eq!(
            env.contabo.instance(11).unwrap().display_name,
            format_display_name(CLUSTER_UUID, "md-0", 0)
        );
    }

    #[tokio::test]
    async fn test_deleted_machine_returns_instance_to_pool() {
        let env = env_with_control_plane();
        let id = drive_to_ready(&env, CP).await;

        env.kube.mark_contabo_machine_deleted(CP);
        let action = env.reconcile_machine(CP).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(env.kube.contabo_machine(CP).is_none());
        let released = env.contabo.instance(id).unwrap();
        assert_eq!(released.display_name, "");
        assert_eq!(released.status, InstanceStatus::Stopped);
        assert!(!env.contabo.private_networks()[0].has_instance(id));

        // The next machine picks the same instance up instead of ordering one
        env.add_machine(control_plane_machine(CLUSTER, "prod-cp-b"));
        env.reconcile_machine("prod-cp-b").await.unwrap();

        assert_eq!(bound_instance_id(&env, "prod-cp-b"), Some(id));
        assert_eq!(env.contabo.call_count("create_instance"), 1);
        assert_eq!(env.contabo.reinstalls().len(), 1);
    }

    #[tokio::test]
    async fn test_deletion_leaves_instance_claimed_by_another_machine() {
        let env = TestEnv::with_ready_cluster(CLUSTER);
        env.add_machine(control_plane_machine(CLUSTER, "prod-cp-a"));
        env.add_machine(control_plane_machine(CLUSTER, "prod-cp-b"));
        env.reconcile_machine("prod-cp-a").await.unwrap();
        env.reconcile_machine("prod-cp-b").await.unwrap();
        let other = bound_instance_id(&env, "prod-cp-b").unwrap();

        // Stale providerID pointing at the sibling's instance
        env.kube
            .set_machine_provider_id(NAMESPACE, "prod-cp-a", Some(&build_provider_id(other)))
            .await
            .unwrap();
        env.kube.mark_contabo_machine_deleted("prod-cp-a");
        env.reconcile_machine("prod-cp-a").await.unwrap();

        assert!(env.kube.contabo_machine("prod-cp-a").is_none());
        assert_eq!(
            env.contabo.instance(other).unwrap().display_name,
            format_display_name(CLUSTER_UUID, "control-plane", 1)
        );
        assert_eq!(env.contabo.call_count("stop_instance"), 0);
        assert_eq!(env.contabo.call_count("unassign_instance"), 0);
    }

    #[tokio::test]
    async fn test_deletion_without_instance_removes_finalizer() {
        let env = env_with_control_plane();
        env.reconcile_machine(CP).await.unwrap();
        let id = bound_instance_id(&env, CP).unwrap();
        env.contabo.remove_instance(id);

        env.kube.mark_contabo_machine_deleted(CP);
        env.reconcile_machine(CP).await.unwrap();

        assert!(env.kube.contabo_machine(CP).is_none());
    }

    #[tokio::test]
    async fn test_failed_release_is_retried() {
        let env = env_with_control_plane();
        drive_to_ready(&env, CP).await;
        env.contabo.fail_operation("stop_instance");

        env.kube.mark_contabo_machine_deleted(CP);
        let action = env.reconcile_machine(CP).await.unwrap();

        assert_eq!(action, requeue_secs(30));
        let machine = env.machine(CP);
        assert!(machine.finalizers().iter().any(|f| f == MACHINE_FINALIZER));
        assert!(machine.status.unwrap().deletion_failing_since.is_some());
    }

    #[tokio::test]
    async fn test_waits_for_bootstrap_data() {
        let env = TestEnv::with_ready_cluster(CLUSTER);
        env.kube.insert_machine(capi_machine(CLUSTER, CP));
        env.kube.insert_contabo_machine(control_plane_machine(CLUSTER, CP));

        let action = env.reconcile_machine(CP).await.unwrap();

        assert_eq!(action, requeue_secs(10));
        let machine = env.machine(CP);
        assert!(machine.spec.index.is_none());
        let ready = find_condition(&machine.status.unwrap().conditions, types::READY)
            .cloned()
            .unwrap();
        assert_eq!(ready.reason, reasons::WAITING_FOR_BOOTSTRAP_DATA);
        assert!(env.contabo.instances().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_cluster_infrastructure() {
        let env = TestEnv::with_cluster(CLUSTER);
        env.add_machine(control_plane_machine(CLUSTER, CP));

        let action = env.reconcile_machine(CP).await.unwrap();

        assert_eq!(action, requeue_secs(10));
        let ready = find_condition(&status(&env, CP).conditions, types::READY).cloned().unwrap();
        assert_eq!(ready.reason, reasons::WAITING_FOR_CLUSTER);
    }

    #[tokio::test]
    async fn test_indices_are_per_role() {
        let env = TestEnv::with_ready_cluster(CLUSTER);
        env.add_machine(control_plane_machine(CLUSTER, "prod-cp-a"));
        env.add_machine(control_plane_machine(CLUSTER, "prod-cp-b"));
        env.add_machine(worker_machine(CLUSTER, "prod-md-0-a"));

        for name in ["prod-cp-a", "prod-cp-b", "prod-md-0-a"] {
            env.reconcile_machine(name).await.unwrap();
        }

        assert_eq!(env.machine("prod-cp-a").spec.index, Some(0));
        assert_eq!(env.machine("prod-cp-b").spec.index, Some(1));
        assert_eq!(env.machine("prod-md-0-a").spec.index, Some(0));
        let mut names: Vec<String> =
            env.contabo.instances().into_iter().map(|i| i.display_name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
    }
}
