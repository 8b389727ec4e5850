//! Controller configuration, read from environment variables.

use crate::error::ControllerError;
use contabo_client::{Credentials, DEFAULT_API_URL, DEFAULT_AUTH_URL};
use std::env;

/// Default number of concurrent reconciles per resource kind
pub const DEFAULT_CONCURRENCY: u16 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub api_url: String,
    pub auth_url: String,
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    pub concurrency: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ControllerError> {
        let required = |key: &str| {
            lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                ControllerError::InvalidConfig(format!("{} environment variable is required", key))
            })
        };

        let credentials = Credentials {
            client_id: required("CONTABO_CLIENT_ID")?,
            client_secret: required("CONTABO_CLIENT_SECRET")?,
            api_user: required("CONTABO_API_USER")?,
            api_password: required("CONTABO_API_PASSWORD")?,
        };

        let concurrency = match lookup("CAPC_CONCURRENCY") {
            Some(raw) => raw.parse::<u16>().ok().filter(|n| *n > 0).ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "CAPC_CONCURRENCY must be a positive integer, got {:?}",
                    raw
                ))
            })?,
            None => DEFAULT_CONCURRENCY,
        };

        Ok(Self {
            credentials,
            api_url: lookup("CONTABO_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            auth_url: lookup("CONTABO_AUTH_URL").unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
            namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.is_empty()),
            concurrency,
        })
    }
}
