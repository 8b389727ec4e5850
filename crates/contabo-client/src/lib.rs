//! Contabo REST API Client
//!
//! A Rust client library for the Contabo public API, covering the pieces a
//! Cluster API infrastructure provider needs: compute instances, private
//! networks and stored SSH secrets.
//!
//! # Example
//!
//! ```no_run
//! use contabo_client::{ContaboClient, ContaboClientTrait, Credentials, InstanceFilter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ContaboClient::with_defaults(Credentials {
//!     client_id: "client-id".to_string(),
//!     client_secret: "client-secret".to_string(),
//!     api_user: "api@example.com".to_string(),
//!     api_password: "password".to_string(),
//! })?;
//!
//! // Instances that are not claimed by any cluster carry an empty display name
//! let filter = InstanceFilter { region: Some("EU".to_string()), ..Default::default() };
//! let instances = client.list_instances(&filter).await?;
//! let available = instances.iter().filter(|i| i.display_name.is_empty()).count();
//! println!("{} of {} instances available", available, instances.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **OAuth2**: password-grant tokens cached and refreshed before expiry
//! - **Request tracing**: every call carries a fresh `x-request-id`
//! - **Pagination**: list calls follow `_pagination` to the last page
//! - **Mocking**: `MockContaboClient` behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
pub mod models;
pub mod token;
#[path = "trait.rs"]
pub mod contabo_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{ContaboClient, DEFAULT_API_URL};
pub use common::HttpClient;
pub use contabo_trait::ContaboClientTrait;
pub use error::ContaboError;
pub use models::*;
pub use token::{Credentials, TokenManager, DEFAULT_AUTH_URL};
#[cfg(feature = "test-util")]
pub use mock::MockContaboClient;
