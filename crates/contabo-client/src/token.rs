//! OAuth2 token manager
//!
//! Contabo issues short-lived bearer tokens through a Keycloak password
//! grant. The manager caches the current token and refreshes it shortly
//! before it expires. Concurrent callers that find the token stale queue on
//! the write lock; only the first one talks to the identity endpoint.

use crate::error::ContaboError;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default Contabo identity endpoint
pub const DEFAULT_AUTH_URL: &str =
    "https://auth.contabo.com/auth/realms/contabo/protocol/openid-connect/token";

/// Tokens closer than this to expiry are treated as expired
pub const TOKEN_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// API credentials for the password grant
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub api_user: String,
    pub api_password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("api_user", &self.api_user)
            .field("api_password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_REFRESH_BUFFER < self.expires_at
    }
}

/// Caches and refreshes the bearer token used by every API call
pub struct TokenManager {
    client: Client,
    auth_url: String,
    credentials: Credentials,
    cached: RwLock<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(client: Client, auth_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client,
            auth_url: auth_url.into(),
            credentials,
            cached: RwLock::new(None),
        }
    }

    /// Return a token valid for at least `TOKEN_REFRESH_BUFFER`, fetching a new one if needed
    pub async fn get_token(&self) -> Result<String, ContaboError> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if token.is_fresh(Instant::now()) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    /// Drop the cached token so the next call re-authenticates
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn fetch_token(&self) -> Result<CachedToken, ContaboError> {
        debug!("Requesting Contabo access token from {}", self.auth_url);

        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("username", self.credentials.api_user.as_str()),
            ("password", self.credentials.api_password.as_str()),
            ("grant_type", "password"),
        ];

        let response = self
            .client
            .post(&self.auth_url)
            .form(&form)
            .send()
            .await
            .map_err(ContaboError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ContaboError::Authentication(format!(
                "token request failed: {} - {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ContaboError::Authentication(format!("invalid token response: {}", e))
        })?;

        info!("Obtained Contabo access token (expires in {}s)", token.expires_in);
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}
