//! Contabo API client
//!
//! Implements the Contabo REST API for compute instances, private networks
//! and secrets. Endpoints live under `/v1/compute/instances`,
//! `/v1/private-networks` and `/v1/secrets`.

use crate::common::{single, HttpClient};
use crate::contabo_trait::ContaboClientTrait;
use crate::error::ContaboError;
use crate::models::*;
use crate::token::{Credentials, TokenManager, DEFAULT_AUTH_URL};
use reqwest::{Client, Method};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default Contabo API base URL
pub const DEFAULT_API_URL: &str = "https://api.contabo.com";

/// Contabo API client
#[derive(Clone)]
pub struct ContaboClient {
    http: HttpClient,
}

impl ContaboClient {
    /// Create a new Contabo client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.contabo.com")
    /// * `auth_url` - OAuth2 token endpoint
    /// * `credentials` - API client and user credentials
    pub fn new(
        base_url: String,
        auth_url: String,
        credentials: Credentials,
    ) -> Result<Self, ContaboError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ContaboError::Http)?;

        let tokens = Arc::new(TokenManager::new(client.clone(), auth_url, credentials));
        Ok(Self {
            http: HttpClient::new(client, base_url, tokens),
        })
    }

    /// Create a client against the public Contabo endpoints
    pub fn with_defaults(credentials: Credentials) -> Result<Self, ContaboError> {
        Self::new(DEFAULT_API_URL.to_string(), DEFAULT_AUTH_URL.to_string(), credentials)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Obtain an OAuth2 token to confirm the credentials are accepted
    pub async fn validate_credentials(&self) -> Result<(), ContaboError> {
        self.http.validate_credentials().await
    }
}

#[async_trait::async_trait]
impl ContaboClientTrait for ContaboClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, ContaboError> {
        self.http.get_all_pages("/v1/compute/instances", &filter.to_query()).await
    }

    async fn get_instance(&self, instance_id: i64) -> Result<Instance, ContaboError> {
        let path = format!("/v1/compute/instances/{}", instance_id);
        let envelope: Envelope<Instance> = self.http.get(&path, &[]).await?;
        single(envelope, &path)
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceRef, ContaboError> {
        if request.product_id.is_empty() {
            return Err(ContaboError::InvalidRequest("productId is required".to_string()));
        }
        let envelope: Envelope<InstanceRef> = self
            .http
            .send_json(Method::POST, "/v1/compute/instances", request)
            .await?;
        let created = single(envelope, "create instance")?;
        debug!("Created instance {}", created.instance_id);
        Ok(created)
    }

    async fn set_display_name(
        &self,
        instance_id: i64,
        display_name: &str,
    ) -> Result<(), ContaboError> {
        let path = format!("/v1/compute/instances/{}", instance_id);
        let body = PatchInstanceRequest {
            display_name: display_name.to_string(),
        };
        self.http.send_json_discard(Method::PATCH, &path, &body).await
    }

    async fn reinstall_instance(
        &self,
        instance_id: i64,
        request: &ReinstallInstanceRequest,
    ) -> Result<(), ContaboError> {
        let path = format!("/v1/compute/instances/{}", instance_id);
        self.http.send_json_discard(Method::PUT, &path, request).await
    }

    async fn instance_action(
        &self,
        instance_id: i64,
        action: InstanceAction,
    ) -> Result<(), ContaboError> {
        let path = format!("/v1/compute/instances/{}/actions/{}", instance_id, action.as_str());
        self.http.send_empty(Method::POST, &path).await
    }

    async fn list_private_networks(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<PrivateNetwork>, ContaboError> {
        let mut query = Vec::new();
        if let Some(name) = name {
            query.push(("name".to_string(), name.to_string()));
        }
        let networks: Vec<PrivateNetwork> =
            self.http.get_all_pages("/v1/private-networks", &query).await?;
        // The name filter is a substring match on the API side
        Ok(match name {
            Some(name) => networks.into_iter().filter(|n| n.name == name).collect(),
            None => networks,
        })
    }

    async fn get_private_network(&self, network_id: i64) -> Result<PrivateNetwork, ContaboError> {
        let path = format!("/v1/private-networks/{}", network_id);
        let envelope: Envelope<PrivateNetwork> = self.http.get(&path, &[]).await?;
        single(envelope, &path)
    }

    async fn create_private_network(
        &self,
        request: &CreatePrivateNetworkRequest,
    ) -> Result<PrivateNetwork, ContaboError> {
        let envelope: Envelope<PrivateNetwork> = self
            .http
            .send_json(Method::POST, "/v1/private-networks", request)
            .await?;
        single(envelope, "create private network")
    }

    async fn delete_private_network(&self, network_id: i64) -> Result<(), ContaboError> {
        let path = format!("/v1/private-networks/{}", network_id);
        self.http.send_empty(Method::DELETE, &path).await
    }

    async fn assign_instance(&self, network_id: i64, instance_id: i64) -> Result<(), ContaboError> {
        let path = format!("/v1/private-networks/{}/instances/{}", network_id, instance_id);
        self.http.send_empty(Method::POST, &path).await
    }

    async fn unassign_instance(
        &self,
        network_id: i64,
        instance_id: i64,
    ) -> Result<(), ContaboError> {
        let path = format!("/v1/private-networks/{}/instances/{}", network_id, instance_id);
        self.http.send_empty(Method::DELETE, &path).await
    }

    async fn list_secrets(
        &self,
        name: Option<&str>,
        secret_type: Option<SecretType>,
    ) -> Result<Vec<Secret>, ContaboError> {
        let mut query = Vec::new();
        if let Some(name) = name {
            query.push(("name".to_string(), name.to_string()));
        }
        if let Some(secret_type) = secret_type {
            query.push(("type".to_string(), secret_type.as_str().to_string()));
        }
        let secrets: Vec<Secret> = self.http.get_all_pages("/v1/secrets", &query).await?;
        Ok(match name {
            Some(name) => secrets.into_iter().filter(|s| s.name == name).collect(),
            None => secrets,
        })
    }

    async fn get_secret(&self, secret_id: i64) -> Result<Secret, ContaboError> {
        let path = format!("/v1/secrets/{}", secret_id);
        let envelope: Envelope<Secret> = self.http.get(&path, &[]).await?;
        single(envelope, &path)
    }

    async fn create_secret(&self, request: &CreateSecretRequest) -> Result<Secret, ContaboError> {
        let envelope: Envelope<Secret> = self
            .http
            .send_json(Method::POST, "/v1/secrets", request)
            .await?;
        single(envelope, "create secret")
    }

    async fn delete_secret(&self, secret_id: i64) -> Result<(), ContaboError> {
        let path = format!("/v1/secrets/{}", secret_id);
        self.http.send_empty(Method::DELETE, &path).await
    }
}
