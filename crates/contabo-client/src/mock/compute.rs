//! Compute operations for MockContaboClient

use super::MockContaboClient;
use crate::error::ContaboError;
use crate::models::*;

pub fn list_instances(
    client: &MockContaboClient,
    filter: &InstanceFilter,
) -> Result<Vec<Instance>, ContaboError> {
    client.record("list_instances")?;
    Ok(client
        .instances
        .lock()
        .unwrap()
        .values()
        .filter(|i| filter.display_name.as_ref().is_none_or(|name| &i.display_name == name))
        .filter(|i| filter.region.as_ref().is_none_or(|region| &i.region == region))
        .filter(|i| filter.product_ids.is_empty() || filter.product_ids.contains(&i.product_id))
        .filter(|i| filter.status.is_none_or(|status| i.status == status))
        .cloned()
        .collect())
}

pub fn get_instance(
    client: &MockContaboClient,
    instance_id: i64,
) -> Result<Instance, ContaboError> {
    client.record("get_instance")?;
    client
        .instances
        .lock()
        .unwrap()
        .get(&instance_id)
        .cloned()
        .ok_or_else(|| ContaboError::NotFound(format!("Instance {} not found", instance_id)))
}

pub fn create_instance(
    client: &MockContaboClient,
    request: &CreateInstanceRequest,
) -> Result<InstanceRef, ContaboError> {
    client.record("create_instance")?;
    let id = client.next_id();
    let octet = id % 250 + 2;

    let instance = Instance {
        instance_id: id,
        name: format!("vmi{}", id),
        display_name: request.display_name.clone().unwrap_or_default(),
        region: request.region.clone(),
        product_id: request.product_id.clone(),
        image_id: request.image_id.clone().unwrap_or_default(),
        ip_config: IpConfig {
            v4: Some(IpV4 {
                ip: format!("198.51.100.{}", octet),
                netmask_cidr: 24,
                gateway: "198.51.100.1".to_string(),
            }),
            v6: Some(IpV6 {
                ip: format!("2001:db8::{:x}", id),
                netmask_cidr: 64,
                gateway: "fe80::1".to_string(),
            }),
        },
        ssh_keys: request.ssh_keys.clone(),
        status: InstanceStatus::Provisioning,
        default_user: request.default_user.clone(),
        ..Default::default()
    };

    client.instances.lock().unwrap().insert(id, instance);
    client.created_instances.lock().unwrap().push(request.clone());
    Ok(InstanceRef {
        instance_id: id,
        status: Some(InstanceStatus::Provisioning),
    })
}

pub fn set_display_name(
    client: &MockContaboClient,
    instance_id: i64,
    display_name: &str,
) -> Result<(), ContaboError> {
    client.record("set_display_name")?;
    let mut instances = client.instances.lock().unwrap();
    let instance = instances
        .get_mut(&instance_id)
        .ok_or_else(|| ContaboError::NotFound(format!("Instance {} not found", instance_id)))?;
    instance.display_name = match client.competing_renames.lock().unwrap().remove(&instance_id) {
        Some(competing) => competing,
        None => display_name.to_string(),
    };
    Ok(())
}

pub fn reinstall_instance(
    client: &MockContaboClient,
    instance_id: i64,
    request: &ReinstallInstanceRequest,
) -> Result<(), ContaboError> {
    client.record("reinstall_instance")?;
    {
        let mut instances = client.instances.lock().unwrap();
        let instance = instances
            .get_mut(&instance_id)
            .ok_or_else(|| ContaboError::NotFound(format!("Instance {} not found", instance_id)))?;
        instance.image_id = request.image_id.clone();
        instance.ssh_keys = request.ssh_keys.clone();
        instance.default_user = request.default_user.clone();
        instance.status = InstanceStatus::Provisioning;
    }
    client.reinstalls.lock().unwrap().push((instance_id, request.clone()));
    Ok(())
}

pub fn instance_action(
    client: &MockContaboClient,
    instance_id: i64,
    action: InstanceAction,
) -> Result<(), ContaboError> {
    client.record(match action {
        InstanceAction::Start => "start_instance",
        InstanceAction::Stop => "stop_instance",
        InstanceAction::Restart => "restart_instance",
    })?;
    {
        let mut instances = client.instances.lock().unwrap();
        let instance = instances
            .get_mut(&instance_id)
            .ok_or_else(|| ContaboError::NotFound(format!("Instance {} not found", instance_id)))?;
        instance.status = match action {
            InstanceAction::Stop => InstanceStatus::Stopped,
            InstanceAction::Start | InstanceAction::Restart => InstanceStatus::Running,
        };
    }
    client.actions.lock().unwrap().push((instance_id, action));
    Ok(())
}
