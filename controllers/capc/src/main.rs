//! CAPC Controller
//!
//! Cluster API infrastructure provider for Contabo:
//! - ContaboCluster: private network, cluster SSH key and control-plane endpoint
//! - ContaboMachine: binds a Machine to a (preferably reused) Contabo instance,
//!   attaches it to the cluster network and waits for cloud-init
//!
//! Instances are never cancelled; deleted machines return theirs to the pool.

mod backoff;
mod config;
mod controller;
mod endpoints;
mod error;
mod index_allocator;
mod kube_client;
mod naming;
mod reconcile_helpers;
mod reconciler;
mod ssh;
mod status_table;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube and reqwest share rustls; one process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting CAPC Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Contabo API URL: {}", config.api_url);
    info!("  Contabo auth URL: {}", config.auth_url);
    info!("  API client: {}", config.credentials.client_id);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", config.concurrency);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
