//! Contabo client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Contabo API
#[derive(Debug, Error)]
pub enum ContaboError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Contabo API returned a non-success status
    #[error("Contabo API error: {status} - {body}")]
    Api { status: u16, body: String },

    /// Resource not found (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request was throttled (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Token acquisition failed or the API rejected the token
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ContaboError {
    /// True when the API answered 404 for the requested resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContaboError::NotFound(_))
    }

    /// True for errors worth retrying on the next reconcile pass.
    pub fn is_transient(&self) -> bool {
        match self {
            ContaboError::Http(_) | ContaboError::RateLimited(_) => true,
            ContaboError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
