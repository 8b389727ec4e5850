//! Private network operations for MockContaboClient

use super::MockContaboClient;
use crate::error::ContaboError;
use crate::models::*;

pub fn list_private_networks(
    client: &MockContaboClient,
    name: Option<&str>,
) -> Result<Vec<PrivateNetwork>, ContaboError> {
    client.record("list_private_networks")?;
    Ok(client
        .networks
        .lock()
        .unwrap()
        .values()
        .filter(|n| name.is_none_or(|name| n.name == name))
        .cloned()
        .collect())
}

pub fn get_private_network(
    client: &MockContaboClient,
    network_id: i64,
) -> Result<PrivateNetwork, ContaboError> {
    client.record("get_private_network")?;
    client
        .networks
        .lock()
        .unwrap()
        .get(&network_id)
        .cloned()
        .ok_or_else(|| ContaboError::NotFound(format!("Private network {} not found", network_id)))
}

pub fn create_private_network(
    client: &MockContaboClient,
    request: &CreatePrivateNetworkRequest,
) -> Result<PrivateNetwork, ContaboError> {
    client.record("create_private_network")?;
    let id = client.next_id();
    let network = PrivateNetwork {
        private_network_id: id,
        name: request.name.clone(),
        description: request.description.clone().unwrap_or_default(),
        region: request.region.clone(),
        cidr: format!("10.{}.0.0/22", id % 250),
        ..Default::default()
    };
    client.networks.lock().unwrap().insert(id, network.clone());
    Ok(network)
}

pub fn delete_private_network(
    client: &MockContaboClient,
    network_id: i64,
) -> Result<(), ContaboError> {
    client.record("delete_private_network")?;
    client
        .networks
        .lock()
        .unwrap()
        .remove(&network_id)
        .map(|_| ())
        .ok_or_else(|| ContaboError::NotFound(format!("Private network {} not found", network_id)))
}

pub fn assign_instance(
    client: &MockContaboClient,
    network_id: i64,
    instance_id: i64,
) -> Result<(), ContaboError> {
    client.record("assign_instance")?;
    let display_name = client
        .instances
        .lock()
        .unwrap()
        .get(&instance_id)
        .map(|i| i.display_name.clone())
        .ok_or_else(|| ContaboError::NotFound(format!("Instance {} not found", instance_id)))?;

    let mut networks = client.networks.lock().unwrap();
    let network = networks
        .get_mut(&network_id)
        .ok_or_else(|| {
            ContaboError::NotFound(format!("Private network {} not found", network_id))
        })?;
    if network.has_instance(instance_id) {
        return Err(ContaboError::Api {
            status: 409,
            body: format!("instance {} already assigned", instance_id),
        });
    }

    let host = network.instances.len() + 2;
    let prefix = network.cidr.split('.').take(2).collect::<Vec<_>>().join(".");
    network.instances.push(PrivateNetworkInstance {
        instance_id,
        display_name,
        private_ip_config: PrivateIpConfig {
            v4: vec![PrivateIpV4 {
                ip: format!("{}.0.{}", prefix, host),
                netmask_cidr: 22,
                gateway: format!("{}.0.1", prefix),
            }],
        },
        ..Default::default()
    });
    Ok(())
}

pub fn unassign_instance(
    client: &MockContaboClient,
    network_id: i64,
    instance_id: i64,
) -> Result<(), ContaboError> {
    client.record("unassign_instance")?;
    let mut networks = client.networks.lock().unwrap();
    let network = networks
        .get_mut(&network_id)
        .ok_or_else(|| {
            ContaboError::NotFound(format!("Private network {} not found", network_id))
        })?;
    if !network.has_instance(instance_id) {
        return Err(ContaboError::NotFound(format!(
            "Instance {} is not assigned to private network {}",
            instance_id, network_id
        )));
    }
    network.instances.retain(|i| i.instance_id != instance_id);
    Ok(())
}
