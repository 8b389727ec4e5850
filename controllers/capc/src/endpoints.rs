//! Control-plane endpoint publication.
//!
//! Exposes the API servers of a workload cluster inside the management
//! cluster as a selector-less headless Service plus one EndpointSlice per
//! address family, mirroring the external addresses of every ready
//! control-plane machine.

use crate::error::ControllerError;
use crate::kube_client::KubeClient;
use crds::{ContaboCluster, ContaboMachine, MachineAddressType, DEFAULT_API_SERVER_PORT};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, info};

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
const MANAGED_BY_LABEL: &str = "endpointslice.kubernetes.io/managed-by";
const MANAGED_BY: &str = "capc-controller";
const PORT_NAME: &str = "https";

pub fn api_server_service_name(cluster_name: &str) -> String {
    format!("{}-apiserver", cluster_name)
}

fn slice_name(cluster_name: &str, family: AddressFamily) -> String {
    format!("{}-{}", api_server_service_name(cluster_name), family.suffix())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    fn suffix(self) -> &'static str {
        match self {
            AddressFamily::V4 => "ipv4",
            AddressFamily::V6 => "ipv6",
        }
    }

    fn address_type(self) -> &'static str {
        match self {
            AddressFamily::V4 => "IPv4",
            AddressFamily::V6 => "IPv6",
        }
    }

    fn matches(self, ip: &IpAddr) -> bool {
        match self {
            AddressFamily::V4 => ip.is_ipv4(),
            AddressFamily::V6 => ip.is_ipv6(),
        }
    }
}

fn object_meta(
    cluster: &ContaboCluster,
    name: String,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(labels),
        owner_references: cluster.controller_owner_ref(&()).map(|o| vec![o]),
        ..Default::default()
    }
}

fn api_server_port(cluster: &ContaboCluster) -> i32 {
    cluster
        .spec
        .control_plane_endpoint
        .as_ref()
        .filter(|e| e.port > 0)
        .map(|e| e.port)
        .unwrap_or(DEFAULT_API_SERVER_PORT)
}

/// Headless Service fronting the API servers
pub fn build_service(cluster: &ContaboCluster) -> Service {
    let cluster_name = cluster.name_any();
    let port = api_server_port(cluster);
    Service {
        metadata: object_meta(cluster, api_server_service_name(&cluster_name), BTreeMap::new()),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// External addresses of ready control-plane machines, sorted and deduplicated
fn control_plane_addresses(machines: &[ContaboMachine], family: AddressFamily) -> Vec<String> {
    let mut addresses: Vec<String> = machines
        .iter()
        .filter(|m| m.is_control_plane() && m.metadata.deletion_timestamp.is_none())
        .filter_map(|m| m.status.as_ref())
        .filter(|s| s.ready)
        .flat_map(|s| s.addresses.iter())
        .filter(|a| a.type_ == MachineAddressType::ExternalIP)
        .filter(|a| a.address.parse::<IpAddr>().is_ok_and(|ip| family.matches(&ip)))
        .map(|a| a.address.clone())
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

fn build_endpoint_slice(
    cluster: &ContaboCluster,
    machines: &[ContaboMachine],
    family: AddressFamily,
) -> EndpointSlice {
    let cluster_name = cluster.name_any();
    let labels = BTreeMap::from([
        (SERVICE_NAME_LABEL.to_string(), api_server_service_name(&cluster_name)),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ]);

    let endpoints = control_plane_addresses(machines, family)
        .into_iter()
        .map(|address| Endpoint {
            addresses: vec![address],
            conditions: Some(EndpointConditions {
                ready: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    EndpointSlice {
        metadata: object_meta(cluster, slice_name(&cluster_name, family), labels),
        address_type: family.address_type().to_string(),
        endpoints,
        ports: Some(vec![EndpointPort {
            name: Some(PORT_NAME.to_string()),
            port: Some(api_server_port(cluster)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
    }
}

/// Apply the Service and both EndpointSlices for `cluster`
pub async fn publish(
    kube: &dyn KubeClient,
    cluster: &ContaboCluster,
    machines: &[ContaboMachine],
) -> Result<(), ControllerError> {
    kube.apply_service(&build_service(cluster)).await?;
    let mut published = 0;
    for family in [AddressFamily::V4, AddressFamily::V6] {
        let slice = build_endpoint_slice(cluster, machines, family);
        published += slice.endpoints.len();
        kube.apply_endpoint_slice(&slice).await?;
    }
    debug!(
        "Published {} control-plane endpoint(s) for ContaboCluster {}",
        published,
        cluster.name_any()
    );
    Ok(())
}

/// Delete the Service and EndpointSlices of `cluster_name`
pub async fn remove(
    kube: &dyn KubeClient,
    namespace: &str,
    cluster_name: &str,
) -> Result<(), ControllerError> {
    for family in [AddressFamily::V4, AddressFamily::V6] {
        kube.delete_endpoint_slice(namespace, &slice_name(cluster_name, family)).await?;
    }
    kube.delete_service(namespace, &api_server_service_name(cluster_name)).await?;
    info!("Removed control-plane endpoints of cluster {}/{}", namespace, cluster_name);
    Ok(())
}
