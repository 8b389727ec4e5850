//! Kubernetes resource watchers.
//!
//! Each CRD gets its own `kube_runtime::Controller` driven by the generic
//! `watch_resource()` helper. The runtime takes care of reconnects, queueing
//! and per-object serialisation; errors are requeued with the reconciler's
//! per-object Fibonacci backoff.

use crate::error::ControllerError;
use crate::reconcile_helpers::resource_key;
use crate::reconciler::Reconciler;
use crds::{ContaboCluster, ContaboMachine};
use futures::StreamExt;
use kube::Api;
use kube_runtime::{
    controller::{Action, Config as ControllerConfig},
    watcher, Controller,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Quiet period after the last event before a reconcile starts
const DEBOUNCE: Duration = Duration::from_secs(5);

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Runs a `kube_runtime::Controller` for `K` until shutdown.
///
/// `reconcile_fn` adapts a reconciler method to the runtime's signature.
/// Status writes retrigger the watch; the debounce folds those into one pass.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: kube::Resource
        + Clone
        + Send
        + Sync
        + 'static
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher (concurrency {})", resource_name, concurrency);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(&*obj);
        let delay = ctx.next_error_backoff(&key);
        warn!(
            "Reconciliation error for {} {}: {} (retry in {:?})",
            resource_name, key, error, delay
        );
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(&*obj);
            debug!("Reconciling {} {}", resource_name, key);
            match reconcile_fn(ctx, obj).await {
                Ok(action) => Ok(action),
                Err(e) => {
                    error!("Reconciliation failed for {} {}: {}", resource_name, key, e);
                    Err(e)
                }
            }
        }
    };

    let controller_config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller event for {}: {}", resource_name, e);
            }
        })
        .await;

    info!("{} watcher stopped", resource_name);
    Ok(())
}

/// Watches the provider's CRDs and feeds them to the reconciler.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    contabo_cluster_api: Api<ContaboCluster>,
    contabo_machine_api: Api<ContaboMachine>,
    concurrency: u16,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        contabo_cluster_api: Api<ContaboCluster>,
        contabo_machine_api: Api<ContaboMachine>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            contabo_cluster_api,
            contabo_machine_api,
            concurrency,
        }
    }

    pub async fn watch_contabo_clusters(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.contabo_cluster_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_contabo_cluster(&resource).await })
            },
            "ContaboCluster",
            self.concurrency,
        )
        .await
    }

    pub async fn watch_contabo_machines(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.contabo_machine_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_contabo_machine(&resource).await })
            },
            "ContaboMachine",
            self.concurrency,
        )
        .await
    }
}
