//! Main controller implementation.
//!
//! `Controller` wires the Kubernetes and Contabo clients into a single
//! `Reconciler` and runs one watcher task per CRD:
//! - ContaboCluster: private network, SSH key, control-plane endpoint
//! - ContaboMachine: instance binding, bootstrap, recovery, release

use crate::config::Config;
use crate::error::ControllerError;
use crate::index_allocator::IndexAllocator;
use crate::kube_client::KubeClientImpl;
use crate::reconciler::Reconciler;
use crate::ssh::RusshShell;
use crate::watcher::Watcher;
use contabo_client::ContaboClient;
use crds::{ContaboCluster, ContaboMachine};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for the Contabo infrastructure provider.
pub struct Controller {
    contabo_cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    contabo_machine_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Connects to both APIs and starts the watchers.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing CAPC controller");

        let kube_client = Client::try_default().await.map_err(ControllerError::Kube)?;

        let contabo_client = ContaboClient::new(
            config.api_url.clone(),
            config.auth_url.clone(),
            config.credentials.clone(),
        )?;

        info!("Validating Contabo API credentials...");
        contabo_client.validate_credentials().await.map_err(|e| {
            error!("Failed to obtain a Contabo access token: {}", e);
            error!("Please ensure:");
            error!("  1. CONTABO_CLIENT_ID and CONTABO_CLIENT_SECRET belong to one API client");
            error!("  2. CONTABO_API_USER and CONTABO_API_PASSWORD are the account's API login");
            error!("  3. The identity endpoint is reachable at {}", config.auth_url);
            ControllerError::Contabo(e)
        })?;
        info!("Contabo credentials accepted");

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(contabo_client),
            Arc::new(KubeClientImpl::new(kube_client.clone())),
            Arc::new(RusshShell),
            IndexAllocator::new(Arc::new(Mutex::new(()))),
        ));

        let (contabo_cluster_api, contabo_machine_api) = match &config.namespace {
            Some(ns) => (
                Api::<ContaboCluster>::namespaced(kube_client.clone(), ns),
                Api::<ContaboMachine>::namespaced(kube_client, ns),
            ),
            None => (
                Api::<ContaboCluster>::all(kube_client.clone()),
                Api::<ContaboMachine>::all(kube_client),
            ),
        };

        let watcher = Arc::new(Watcher::new(
            reconciler,
            contabo_cluster_api,
            contabo_machine_api,
            config.concurrency,
        ));

        let contabo_cluster_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_contabo_clusters().await })
        };
        let contabo_machine_watcher =
            tokio::spawn(async move { watcher.watch_contabo_machines().await });

        Ok(Self {
            contabo_cluster_watcher,
            contabo_machine_watcher,
        })
    }

    /// Runs until a watcher stops, which happens on SIGTERM/ctrl-c.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("CAPC controller running");

        tokio::select! {
            result = &mut self.contabo_cluster_watcher => {
                result.map_err(|e| {
                    ControllerError::Watch(format!("ContaboCluster watcher panicked: {}", e))
                })??;
            }
            result = &mut self.contabo_machine_watcher => {
                result.map_err(|e| {
                    ControllerError::Watch(format!("ContaboMachine watcher panicked: {}", e))
                })??;
            }
        }

        info!("CAPC controller shutting down");
        Ok(())
    }
}
