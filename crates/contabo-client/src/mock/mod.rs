//! Mock ContaboClient for unit testing
//!
//! This module provides an in-memory implementation of ContaboClientTrait
//! that can be used in unit tests without talking to the Contabo API.
//!
//! The mock is organized into domain-specific modules:
//! - `compute.rs` - instances, display names, reinstall and power actions
//! - `networks.rs` - private networks and instance membership
//! - `secrets.rs` - stored SSH / password secrets

mod compute;
mod networks;
mod secrets;

use crate::contabo_trait::ContaboClientTrait;
use crate::error::ContaboError;
use crate::models::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Mock ContaboClient for testing
///
/// Resources live in memory. Every mutating call is counted so tests can
/// assert idempotence ("the second reconcile created nothing").
#[derive(Clone)]
pub struct MockContaboClient {
    pub(crate) base_url: String,
    pub(crate) instances: Arc<Mutex<BTreeMap<i64, Instance>>>,
    pub(crate) networks: Arc<Mutex<BTreeMap<i64, PrivateNetwork>>>,
    pub(crate) secrets: Arc<Mutex<BTreeMap<i64, Secret>>>,
    /// Requests seen by create_instance, in order
    pub(crate) created_instances: Arc<Mutex<Vec<CreateInstanceRequest>>>,
    /// (instance id, request) seen by reinstall_instance
    pub(crate) reinstalls: Arc<Mutex<Vec<(i64, ReinstallInstanceRequest)>>>,
    /// (instance id, action) seen by instance_action
    pub(crate) actions: Arc<Mutex<Vec<(i64, InstanceAction)>>>,
    pub(crate) calls: Arc<Mutex<HashMap<&'static str, usize>>>,
    /// Operations forced to fail with a 500
    pub(crate) failing: Arc<Mutex<HashSet<&'static str>>>,
    /// Names another claimant writes right after our next rename of an instance
    pub(crate) competing_renames: Arc<Mutex<HashMap<i64, String>>>,
    pub(crate) next_id: Arc<Mutex<i64>>,
}

impl MockContaboClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            instances: Arc::new(Mutex::new(BTreeMap::new())),
            networks: Arc::new(Mutex::new(BTreeMap::new())),
            secrets: Arc::new(Mutex::new(BTreeMap::new())),
            created_instances: Arc::new(Mutex::new(Vec::new())),
            reinstalls: Arc::new(Mutex::new(Vec::new())),
            actions: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            competing_renames: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1000)),
        }
    }

    /// Add an instance to the mock store (for test setup)
    pub fn add_instance(&self, instance: Instance) {
        self.instances.lock().unwrap().insert(instance.instance_id, instance);
    }

    /// Add a private network to the mock store (for test setup)
    pub fn add_private_network(&self, network: PrivateNetwork) {
        self.networks.lock().unwrap().insert(network.private_network_id, network);
    }

    /// Add a secret to the mock store (for test setup)
    pub fn add_secret(&self, secret: Secret) {
        self.secrets.lock().unwrap().insert(secret.secret_id, secret);
    }

    /// Force the provider-side status of an instance
    pub fn set_instance_status(&self, instance_id: i64, status: InstanceStatus) {
        if let Some(instance) = self.instances.lock().unwrap().get_mut(&instance_id) {
            instance.status = status;
        }
    }

    /// Remove an instance as if it was cancelled out of band
    pub fn remove_instance(&self, instance_id: i64) {
        self.instances.lock().unwrap().remove(&instance_id);
    }

    /// Make every call of `operation` fail with HTTP 500 until cleared
    pub fn fail_operation(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    /// Simulate another controller renaming `instance_id` to `display_name`
    /// immediately after the next `set_display_name` on it
    pub fn rename_after_next_claim(&self, instance_id: i64, display_name: impl Into<String>) {
        self.competing_renames.lock().unwrap().insert(instance_id, display_name.into());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn instance(&self, instance_id: i64) -> Option<Instance> {
        self.instances.lock().unwrap().get(&instance_id).cloned()
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.instances.lock().unwrap().values().cloned().collect()
    }

    pub fn private_networks(&self) -> Vec<PrivateNetwork> {
        self.networks.lock().unwrap().values().cloned().collect()
    }

    pub fn secrets(&self) -> Vec<Secret> {
        self.secrets.lock().unwrap().values().cloned().collect()
    }

    pub fn created_instances(&self) -> Vec<CreateInstanceRequest> {
        self.created_instances.lock().unwrap().clone()
    }

    pub fn reinstalls(&self) -> Vec<(i64, ReinstallInstanceRequest)> {
        self.reinstalls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<(i64, InstanceAction)> {
        self.actions.lock().unwrap().clone()
    }

    /// Number of times `operation` was invoked
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    /// Record a call and fail it if the test asked for that
    pub(crate) fn record(&self, operation: &'static str) -> Result<(), ContaboError> {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
        if self.failing.lock().unwrap().contains(operation) {
            return Err(ContaboError::Api {
                status: 500,
                body: format!("{} failed (injected)", operation),
            });
        }
        Ok(())
    }

    /// Generate next ID
    pub(crate) fn next_id(&self) -> i64 {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        current
    }
}

#[async_trait::async_trait]
impl ContaboClientTrait for MockContaboClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, ContaboError> {
        compute::list_instances(self, filter)
    }

    async fn get_instance(&self, instance_id: i64) -> Result<Instance, ContaboError> {
        compute::get_instance(self, instance_id)
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceRef, ContaboError> {
        compute::create_instance(self, request)
    }

    async fn set_display_name(
        &self,
        instance_id: i64,
        display_name: &str,
    ) -> Result<(), ContaboError> {
        compute::set_display_name(self, instance_id, display_name)
    }

    async fn reinstall_instance(
        &self,
        instance_id: i64,
        request: &ReinstallInstanceRequest,
    ) -> Result<(), ContaboError> {
        compute::reinstall_instance(self, instance_id, request)
    }

    async fn instance_action(
        &self,
        instance_id: i64,
        action: InstanceAction,
    ) -> Result<(), ContaboError> {
        compute::instance_action(self, instance_id, action)
    }

    async fn list_private_networks(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<PrivateNetwork>, ContaboError> {
        networks::list_private_networks(self, name)
    }

    async fn get_private_network(&self, network_id: i64) -> Result<PrivateNetwork, ContaboError> {
        networks::get_private_network(self, network_id)
    }

    async fn create_private_network(
        &self,
        request: &CreatePrivateNetworkRequest,
    ) -> Result<PrivateNetwork, ContaboError> {
        networks::create_private_network(self, request)
    }

    async fn delete_private_network(&self, network_id: i64) -> Result<(), ContaboError> {
        networks::delete_private_network(self, network_id)
    }

    async fn assign_instance(&self, network_id: i64, instance_id: i64) -> Result<(), ContaboError> {
        networks::assign_instance(self, network_id, instance_id)
    }

    async fn unassign_instance(
        &self,
        network_id: i64,
        instance_id: i64,
    ) -> Result<(), ContaboError> {
        networks::unassign_instance(self, network_id, instance_id)
    }

    async fn list_secrets(
        &self,
        name: Option<&str>,
        secret_type: Option<SecretType>,
    ) -> Result<Vec<Secret>, ContaboError> {
        secrets::list_secrets(self, name, secret_type)
    }

    async fn get_secret(&self, secret_id: i64) -> Result<Secret, ContaboError> {
        secrets::get_secret(self, secret_id)
    }

    async fn create_secret(&self, request: &CreateSecretRequest) -> Result<Secret, ContaboError> {
        secrets::create_secret(self, request)
    }

    async fn delete_secret(&self, secret_id: i64) -> Result<(), ContaboError> {
        secrets::delete_secret(self, secret_id)
    }
}
