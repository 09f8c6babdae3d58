//! Regnet - Container Registry Networking Library
//!
//! Regnet resolves, authenticates against and searches container
//! registries speaking the Docker Registry HTTP API (V1 and V2).
//!
//! # Quick Start
//!
//! ```no_run
//! use libregnet::{AuthConfig, Service};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Service::builder().build()?;
//!
//!     // Where would a pull of docker.io images go?
//!     for endpoint in service.lookup_pull_endpoints("docker.io")? {
//!         println!("{} {}", endpoint.version, endpoint.url);
//!     }
//!
//!     // Search every configured index
//!     for result in service.search("alpine", Some(10), None, true).await? {
//!         println!("{}/{} {}", result.registry_name, result.name, result.star_count);
//!     }
//!
//!     // Validate credentials
//!     let auth = AuthConfig::basic("alice", "s3cret", "registry.example.com");
//!     println!("{}", service.auth(&auth).await?.status);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Reference normalization**: Docker-style short names, `library/` elision
//! - **Trust configuration**: insecure CIDRs and hosts, mirrors, live reloads
//! - **Endpoint resolution**: ordered mirror, V2 and V1 candidates per host
//! - **Authentication**: V2 token and basic flows with V1 fallback
//! - **Federated search**: concurrent multi-index search with ranking and dedup
//!
//! # Main Types
//!
//! - [`Service`] - Main entry point
//! - [`ServiceBuilder`] - Builder for advanced configuration
//! - [`AuthConfig`] - Credentials for login and search
//! - [`Reference`] - Image reference parsing and normalization
//! - [`SearchResult`] - A ranked search hit
//! - [`ApiEndpoint`] - One candidate endpoint for a host
//!
//! For most use cases, you should use the [`Service`] struct. The low-level
//! modules are available if you need fine-grained control, but are not shown
//! in the documentation by default.

#![warn(clippy::all)]

/// Returns the libregnet crate version.
///
/// # Examples
///
/// ```
/// let version = libregnet::version();
/// assert!(!version.is_empty());
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// High-level public API (main entry point)
pub mod service;
pub use service::{RepositoryInfo, Service, ServiceBuilder};

// Re-export commonly used types for convenience
pub use auth::{AuthConfig, Credentials, LoginStatus};
pub use config::Config;
pub use endpoint::{ApiEndpoint, ApiVersion};
pub use error::{Result, RegnetError};
pub use reference::Reference;
pub use search::SearchResult;
pub use security::{IndexInfo, TlsPolicy};

// Low-level implementation modules (hidden from docs but still public)
#[doc(hidden)]
pub mod auth;
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod endpoint;
#[doc(hidden)]
pub mod error;
#[doc(hidden)]
pub mod reference;
#[doc(hidden)]
pub mod search;
#[doc(hidden)]
pub mod security;
#[doc(hidden)]
pub mod transport;
