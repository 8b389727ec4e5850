//! Kubernetes access used by the reconcilers.
//!
//! Everything the reconcilers read or write in the cluster goes through
//! [`KubeClient`], so unit tests can run reconcile passes against the
//! in-memory fake in `test_utils`.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{
    ApiEndpoint, Cluster, ContaboCluster, ContaboClusterStatus, ContaboMachine,
    ContaboMachineStatus, Machine, CLUSTER_FINALIZER, CLUSTER_NAME_LABEL, MACHINE_FINALIZER,
};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "capc-controller";

#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Cluster API `Cluster`
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Cluster>, ControllerError>;

    /// Cluster API `Machine`
    async fn get_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Machine>, ControllerError>;

    async fn get_contabo_cluster(&self, namespace: &str, name: &str)
        -> Result<Option<ContaboCluster>, ControllerError>;

    async fn get_contabo_machine(&self, namespace: &str, name: &str)
        -> Result<Option<ContaboMachine>, ControllerError>;

    /// ContaboMachines carrying the cluster-name label of `cluster_name`
    async fn list_contabo_machines(&self, namespace: &str, cluster_name: &str)
        -> Result<Vec<ContaboMachine>, ControllerError>;

    /// Full update; fails on a stale resourceVersion
    async fn replace_contabo_machine(
        &self,
        machine: &ContaboMachine,
    ) -> Result<ContaboMachine, ControllerError>;

    /// Set or clear `spec.providerID`
    async fn set_machine_provider_id(
        &self,
        namespace: &str,
        name: &str,
        provider_id: Option<&str>,
    ) -> Result<(), ControllerError>;

    async fn patch_contabo_machine_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ContaboMachineStatus,
    ) -> Result<(), ControllerError>;

    async fn patch_contabo_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ContaboClusterStatus,
    ) -> Result<(), ControllerError>;

    /// Set `spec.controlPlaneEndpoint`
    async fn set_cluster_endpoint(
        &self,
        namespace: &str,
        name: &str,
        endpoint: &ApiEndpoint,
    ) -> Result<(), ControllerError>;

    async fn add_cluster_finalizer(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError>;
    async fn remove_cluster_finalizer(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError>;
    async fn add_machine_finalizer(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError>;
    async fn remove_machine_finalizer(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError>;

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ControllerError>;
    async fn create_secret(&self, secret: &Secret) -> Result<(), ControllerError>;
    /// Missing secrets are not an error
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    /// Server-side apply
    async fn apply_service(&self, service: &Service) -> Result<(), ControllerError>;
    /// Server-side apply
    async fn apply_endpoint_slice(&self, slice: &EndpointSlice) -> Result<(), ControllerError>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;
    async fn delete_endpoint_slice(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError>;
}

/// [`KubeClient`] backed by the API server
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn delete_ignoring_missing<K>(api: &Api<K>, name: &str) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!("{} already gone", name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn set_finalizer<K>(
    api: &Api<K>,
    name: &str,
    finalizer: &str,
    present: bool,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let Some(obj) = api.get_opt(name).await? else {
        return Ok(());
    };
    let mut finalizers = obj.meta().finalizers.clone().unwrap_or_default();
    let has = finalizers.iter().any(|f| f == finalizer);
    if has == present {
        return Ok(());
    }
    if present {
        finalizers.push(finalizer.to_string());
    } else {
        finalizers.retain(|f| f != finalizer);
    }

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

fn status_apply_patch<K: Resource<DynamicType = ()>>(
    status: &impl serde::Serialize,
) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": K::api_version(&()),
        "kind": K::kind(&()),
        "status": status,
    })
}

fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Cluster>, ControllerError> {
        get_opt(&self.api::<Cluster>(namespace), name).await
    }

    async fn get_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Machine>, ControllerError> {
        get_opt(&self.api::<Machine>(namespace), name).await
    }

    async fn get_contabo_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ContaboCluster>, ControllerError> {
        get_opt(&self.api::<ContaboCluster>(namespace), name).await
    }

    async fn get_contabo_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ContaboMachine>, ControllerError> {
        get_opt(&self.api::<ContaboMachine>(namespace), name).await
    }

    async fn list_contabo_machines(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<ContaboMachine>, ControllerError> {
        let lp = ListParams::default().labels(&format!("{}={}", CLUSTER_NAME_LABEL, cluster_name));
        Ok(self.api::<ContaboMachine>(namespace).list(&lp).await?.items)
    }

    async fn replace_contabo_machine(
        &self,
        machine: &ContaboMachine,
    ) -> Result<ContaboMachine, ControllerError> {
        let namespace = machine.metadata.namespace.as_deref().unwrap_or("default");
        let name = machine.metadata.name.as_deref().unwrap_or_default();
        Ok(self
            .api::<ContaboMachine>(namespace)
            .replace(name, &PostParams::default(), machine)
            .await?)
    }

    async fn set_machine_provider_id(
        &self,
        namespace: &str,
        name: &str,
        provider_id: Option<&str>,
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({
            "spec": {
                "providerID": provider_id
            }
        });
        self.api::<ContaboMachine>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_contabo_machine_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ContaboMachineStatus,
    ) -> Result<(), ControllerError> {
        let patch = status_apply_patch::<ContaboMachine>(status);
        self.api::<ContaboMachine>(namespace)
            .patch_status(name, &apply_params(), &Patch::Apply(&patch))
            .await?;
        Ok(())
    }

    async fn patch_contabo_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ContaboClusterStatus,
    ) -> Result<(), ControllerError> {
        let patch = status_apply_patch::<ContaboCluster>(status);
        self.api::<ContaboCluster>(namespace)
            .patch_status(name, &apply_params(), &Patch::Apply(&patch))
            .await?;
        Ok(())
    }

    async fn set_cluster_endpoint(
        &self,
        namespace: &str,
        name: &str,
        endpoint: &ApiEndpoint,
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({
            "spec": {
                "controlPlaneEndpoint": endpoint
            }
        });
        self.api::<ContaboCluster>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_cluster_finalizer(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        set_finalizer(&self.api::<ContaboCluster>(namespace), name, CLUSTER_FINALIZER, true).await
    }

    async fn remove_cluster_finalizer(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        set_finalizer(&self.api::<ContaboCluster>(namespace), name, CLUSTER_FINALIZER, false).await
    }

    async fn add_machine_finalizer(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        set_finalizer(&self.api::<ContaboMachine>(namespace), name, MACHINE_FINALIZER, true).await
    }

    async fn remove_machine_finalizer(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        set_finalizer(&self.api::<ContaboMachine>(namespace), name, MACHINE_FINALIZER, false).await
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ControllerError> {
        get_opt(&self.api::<Secret>(namespace), name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), ControllerError> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or("default");
        self.api::<Secret>(namespace).create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        delete_ignoring_missing(&self.api::<Secret>(namespace), name).await
    }

    async fn apply_service(&self, service: &Service) -> Result<(), ControllerError> {
        let namespace = service.metadata.namespace.as_deref().unwrap_or("default");
        let name = service.metadata.name.as_deref().unwrap_or_default();
        self.api::<Service>(namespace)
            .patch(name, &apply_params(), &Patch::Apply(service))
            .await?;
        Ok(())
    }

    async fn apply_endpoint_slice(&self, slice: &EndpointSlice) -> Result<(), ControllerError> {
        let namespace = slice.metadata.namespace.as_deref().unwrap_or("default");
        let name = slice.metadata.name.as_deref().unwrap_or_default();
        self.api::<EndpointSlice>(namespace)
            .patch(name, &apply_params(), &Patch::Apply(slice))
            .await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        delete_ignoring_missing(&self.api::<Service>(namespace), name).await
    }

    async fn delete_endpoint_slice(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        delete_ignoring_missing(&self.api::<EndpointSlice>(namespace), name).await
    }
}
