//! Controller-specific error types.
//!
//! This module defines error types specific to the CAPC controller
//! that are not covered by upstream library errors.

use contabo_client::ContaboError;
use crds::CrdError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the CAPC controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Contabo API error
    #[error("Contabo error: {0}")]
    Contabo(#[from] ContaboError),

    /// Custom resource is missing data the provider relies on
    #[error("Invalid resource: {0}")]
    Crd(#[from] CrdError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed `contabo://` provider ID
    #[error("Invalid provider ID: {0}")]
    InvalidProviderId(String),

    /// SSH transport or authentication failure
    #[error("SSH error: {0}")]
    Ssh(String),

    /// SSH key pair generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A step of a reconcile pass failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl From<russh::Error> for ControllerError {
    fn from(e: russh::Error) -> Self {
        ControllerError::Ssh(e.to_string())
    }
}

impl From<russh_keys::Error> for ControllerError {
    fn from(e: russh_keys::Error) -> Self {
        ControllerError::Ssh(format!("invalid private key: {}", e))
    }
}
