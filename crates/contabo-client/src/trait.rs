//! ContaboClient trait for mocking
//!
//! This trait abstracts the ContaboClient to enable mocking in unit tests.
//! The concrete ContaboClient implements this trait, and tests can use the
//! in-memory mock behind the `test-util` feature.

use crate::error::ContaboError;
use crate::models::*;

/// Trait for Contabo API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ContaboClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    // Compute instances
    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, ContaboError>;
    async fn get_instance(&self, instance_id: i64) -> Result<Instance, ContaboError>;
    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceRef, ContaboError>;
    async fn set_display_name(
        &self,
        instance_id: i64,
        display_name: &str,
    ) -> Result<(), ContaboError>;
    async fn reinstall_instance(
        &self,
        instance_id: i64,
        request: &ReinstallInstanceRequest,
    ) -> Result<(), ContaboError>;
    async fn instance_action(
        &self,
        instance_id: i64,
        action: InstanceAction,
    ) -> Result<(), ContaboError>;

    async fn start_instance(&self, instance_id: i64) -> Result<(), ContaboError> {
        self.instance_action(instance_id, InstanceAction::Start).await
    }

    async fn stop_instance(&self, instance_id: i64) -> Result<(), ContaboError> {
        self.instance_action(instance_id, InstanceAction::Stop).await
    }

    async fn restart_instance(&self, instance_id: i64) -> Result<(), ContaboError> {
        self.instance_action(instance_id, InstanceAction::Restart).await
    }

    // Private networks
    async fn list_private_networks(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<PrivateNetwork>, ContaboError>;
    async fn get_private_network(&self, network_id: i64) -> Result<PrivateNetwork, ContaboError>;
    async fn create_private_network(
        &self,
        request: &CreatePrivateNetworkRequest,
    ) -> Result<PrivateNetwork, ContaboError>;
    async fn delete_private_network(&self, network_id: i64) -> Result<(), ContaboError>;
    async fn assign_instance(&self, network_id: i64, instance_id: i64) -> Result<(), ContaboError>;
    async fn unassign_instance(
        &self,
        network_id: i64,
        instance_id: i64,
    ) -> Result<(), ContaboError>;

    // Secrets
    async fn list_secrets(
        &self,
        name: Option<&str>,
        secret_type: Option<SecretType>,
    ) -> Result<Vec<Secret>, ContaboError>;
    async fn get_secret(&self, secret_id: i64) -> Result<Secret, ContaboError>;
    async fn create_secret(&self, request: &CreateSecretRequest) -> Result<Secret, ContaboError>;
    async fn delete_secret(&self, secret_id: i64) -> Result<(), ContaboError>;
}
