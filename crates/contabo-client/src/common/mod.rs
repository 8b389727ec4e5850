//! Common utilities for the Contabo API client
//!
//! Provides the authenticated request plumbing shared by all endpoints.

use crate::error::ContaboError;
use crate::models::Envelope;
use crate::token::TokenManager;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Page size requested from list endpoints
pub const PAGE_SIZE: u64 = 100;

/// HTTP client wrapper with bearer authentication
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, tokens: Arc<TokenManager>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a token now so bad credentials surface at startup
    pub async fn validate_credentials(&self) -> Result<(), ContaboError> {
        self.tokens.get_token().await.map(|_| ())
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Start a request carrying the bearer token and a fresh request id
    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ContaboError> {
        let token = self.tokens.get_token().await?;
        let request_id = Uuid::new_v4().to_string();
        let url = self.build_url(path);
        debug!("{} {} (x-request-id {})", method, url, request_id);

        Ok(self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("x-request-id", request_id)
            .header("Accept", "application/json"))
    }

    /// Send a request, re-authenticating once if the token is rejected
    async fn send<F>(&self, method: &Method, path: &str, build: F) -> Result<Response, ContaboError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut reauthenticated = false;
        loop {
            let response = build(self.request(method.clone(), path).await?)
                .send()
                .await
                .map_err(ContaboError::Http)?;
            if response.status() == StatusCode::UNAUTHORIZED && !reauthenticated {
                debug!("{} {} rejected the access token, fetching a new one", method, path);
                self.tokens.invalidate().await;
                reauthenticated = true;
                continue;
            }
            return self.check(method, path, response).await;
        }
    }

    /// Map non-success statuses onto `ContaboError`
    async fn check(
        &self,
        method: &Method,
        path: &str,
        response: Response,
    ) -> Result<Response, ContaboError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => {
                Err(ContaboError::NotFound(format!("{} {} - {}", method, path, body)))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                Err(ContaboError::RateLimited(format!("{} {} - {}", method, path, body)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                // Force a new token on the next call
                self.tokens.invalidate().await;
                Err(ContaboError::Authentication(format!(
                    "{} {} failed: {} - {}",
                    method, path, status, body
                )))
            }
            _ => Err(ContaboError::Api {
                status: status.as_u16(),
                body: format!("{} {} failed: {}", method, path, body),
            }),
        }
    }

    async fn decode<T: DeserializeOwned>(
        path: &str,
        response: Response,
    ) -> Result<T, ContaboError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            debug!(
                "Failed to decode response from {}: {} - body (first 500 chars): {}",
                path,
                e,
                text.chars().take(500).collect::<String>()
            );
            ContaboError::Serialization(e)
        })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, ContaboError> {
        let response = self.send(&Method::GET, path, |r| r.query(query)).await?;
        Self::decode(path, response).await
    }

    /// Make a request with a JSON body and decode the response
    pub async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ContaboError> {
        let response = self.send(&method, path, |r| r.json(body)).await?;
        Self::decode(path, response).await
    }

    /// Make a request with a JSON body, ignoring the response body
    pub async fn send_json_discard<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), ContaboError> {
        self.send(&method, path, |r| r.json(body)).await?;
        Ok(())
    }

    /// Make a bodyless request whose response body is not needed
    pub async fn send_empty(&self, method: Method, path: &str) -> Result<(), ContaboError> {
        self.send(&method, path, |r| r).await?;
        Ok(())
    }

    /// Fetch all pages of a list endpoint
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: &[(String, String)],
    ) -> Result<Vec<T>, ContaboError> {
        let mut all_results = Vec::new();
        let mut page = 1u64;

        loop {
            let mut query = filters.to_vec();
            query.push(("page".to_string(), page.to_string()));
            query.push(("size".to_string(), PAGE_SIZE.to_string()));

            let envelope: Envelope<T> = self.get(path, &query).await?;
            all_results.extend(envelope.data);

            match envelope.pagination {
                Some(p) if p.total_pages > page => page += 1,
                _ => break,
            }
        }

        Ok(all_results)
    }
}

/// Take the single record out of a response envelope
pub fn single<T>(envelope: Envelope<T>, what: &str) -> Result<T, ContaboError> {
    envelope
        .data
        .into_iter()
        .next()
        .ok_or_else(|| ContaboError::NotFound(format!("empty response for {}", what)))
}
