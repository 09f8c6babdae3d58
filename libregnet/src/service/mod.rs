//! High-level registry service.
//!
//! [`Service`] wires the trust configuration, endpoint resolver,
//! authenticator and searcher together from one [`Config`]. It is the
//! recommended entry point for most users.
//!
//! # Examples
//!
//! ```no_run
//! use libregnet::{AuthConfig, Service};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Service::builder().build()?;
//!
//!     for result in service.search("nginx", Some(10), None, false).await? {
//!         println!("{} {} ({} stars)", result.index_name, result.name, result.star_count);
//!     }
//!
//!     let auth = AuthConfig::basic("alice", "s3cret", "registry.example.com");
//!     let status = service.auth(&auth).await?;
//!     println!("{}", status.status);
//!
//!     Ok(())
//! }
//! ```

use crate::auth::{AuthConfig, Authenticator, LoginStatus};
use crate::config::{Config, DEFAULT_NAMESPACE};
use crate::endpoint::{ApiEndpoint, EndpointResolver};
use crate::error::{Result, RegnetError};
use crate::reference::{LIBRARY_PREFIX, Reference};
use crate::search::{SearchResult, Searcher};
use crate::security::{
    HostResolver, IndexInfo, SecurityConfig, ServiceConfig, SystemResolver, TlsPolicy,
    validate_host_port,
};
use crate::transport::{ClientConfig, HttpTransport, RegistryTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
mod tests;

/// A repository name together with the index it lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    /// The name, qualified with its index.
    pub name: Reference,
    pub index: IndexInfo,
    /// True for repositories in the reserved namespace of the official index.
    pub official: bool,
}

/// Registry service: login, search and endpoint resolution over one shared
/// trust configuration.
pub struct Service {
    config: Config,
    security: Arc<SecurityConfig>,
    endpoints: EndpointResolver,
    authenticator: Authenticator,
    searcher: Searcher,
}

impl Service {
    /// Creates a service from `config` with the default transport and
    /// system host resolution.
    pub fn new(config: Config) -> Result<Self> {
        ServiceBuilder::new().with_config(config).build()
    }

    /// Create a builder for advanced configuration.
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    /// Returns the startup configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the shared trust configuration.
    pub fn security(&self) -> &Arc<SecurityConfig> {
        &self.security
    }

    /// Returns a snapshot of the current trust configuration.
    pub fn service_config(&self) -> Arc<ServiceConfig> {
        self.security.snapshot()
    }

    /// Replaces the insecure registries. See [`SecurityConfig::load_insecure_registries`].
    pub fn load_insecure_registries<S: AsRef<str>>(&self, registries: &[S]) -> Result<()> {
        self.security.load_insecure_registries(registries)
    }

    /// Replaces the registry mirrors.
    pub fn load_mirrors<S: AsRef<str>>(&self, mirrors: &[S]) -> Result<()> {
        self.security.load_mirrors(mirrors)
    }

    /// Replaces the registries allowed to serve nondistributable artifacts.
    pub fn load_allow_nondistributable_artifacts<S: AsRef<str>>(
        &self,
        registries: &[S],
    ) -> Result<()> {
        self.security.load_allow_nondistributable_artifacts(registries)
    }

    /// Validates credentials against their registry.
    pub async fn auth(&self, auth: &AuthConfig) -> Result<LoginStatus> {
        self.authenticator.login(auth).await
    }

    /// Searches the configured registries. See [`Searcher::search`].
    pub async fn search(
        &self,
        term: &str,
        limit: Option<usize>,
        auth: Option<&AuthConfig>,
        no_index: bool,
    ) -> Result<Vec<SearchResult>> {
        self.searcher.search(term, limit, auth, no_index).await
    }

    /// Endpoints to pull from, mirrors first.
    pub fn lookup_pull_endpoints(&self, hostname: &str) -> Result<Vec<ApiEndpoint>> {
        self.endpoints.lookup_pull_endpoints(hostname)
    }

    /// Endpoints to push to.
    pub fn lookup_push_endpoints(&self, hostname: &str) -> Result<Vec<ApiEndpoint>> {
        self.endpoints.lookup_push_endpoints(hostname)
    }

    /// TLS policy for `https` connections to `hostname`.
    pub fn tls_policy(&self, hostname: &str) -> Result<TlsPolicy> {
        validate_host_port(hostname).map_err(|_| RegnetError::invalid_hostname(hostname))?;
        Ok(self.security.tls_policy(hostname))
    }

    /// Parses a raw reference, treating the configured default registries
    /// as aliases of the default registry.
    pub fn parse_reference(&self, raw: &str) -> Result<Reference> {
        Reference::parse_with(raw, self.service_config().default_registries.as_slice())
    }

    /// Shortest form of `reference` under the configured default registries.
    pub fn familiar_string(&self, reference: &Reference) -> String {
        reference.familiar_string_with(self.service_config().default_registries.as_slice())
    }

    /// Splits a reference into its index and the index configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::{Reference, Service};
    ///
    /// let service = Service::builder().build().unwrap();
    /// let info = service
    ///     .resolve_repository(&Reference::parse("ubuntu").unwrap())
    ///     .unwrap();
    ///
    /// assert!(info.index.official);
    /// assert!(info.official);
    /// assert_eq!(info.name.to_string(), "docker.io/library/ubuntu");
    /// ```
    pub fn resolve_repository(&self, reference: &Reference) -> Result<RepositoryInfo> {
        let index_name = match reference.domain() {
            "" => DEFAULT_NAMESPACE,
            domain => domain,
        };
        let index = self.security.index_info(index_name)?;

        let name = reference.unqualify().qualify(&index.name)?;
        let official = index.official
            && name
                .path()
                .strip_prefix(LIBRARY_PREFIX)
                .is_some_and(|rest| !rest.contains('/'));

        Ok(RepositoryInfo {
            name,
            index,
            official,
        })
    }
}

/// Builder for creating a [`Service`] with custom configuration.
#[derive(Default)]
pub struct ServiceBuilder {
    config: Option<Config>,
    config_file: Option<PathBuf>,
    transport: Option<Arc<dyn RegistryTransport>>,
    resolver: Option<Arc<dyn HostResolver>>,
}

impl ServiceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration directly.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from a YAML file when building.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Use a custom network transport.
    pub fn with_transport(mut self, transport: Arc<dyn RegistryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom host resolver for CIDR matching.
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Build the `Service` instance.
    ///
    /// An explicit configuration wins over a configuration file.
    pub fn build(self) -> Result<Service> {
        let config = match (self.config, self.config_file) {
            (Some(config), _) => config,
            (None, Some(path)) => Config::load(Some(&path))?,
            (None, None) => Config::default(),
        };

        let resolver = self.resolver.unwrap_or_else(|| Arc::new(SystemResolver));
        let security = Arc::new(SecurityConfig::with_resolver(&config.registry, resolver)?);

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_config(ClientConfig::from(&config.network))?),
        };

        let endpoints = EndpointResolver::new(Arc::clone(&security));
        let authenticator = Authenticator::new(
            endpoints.clone(),
            Arc::clone(&transport),
            config.registry.index_server.clone(),
        );
        let searcher = Searcher::new(
            endpoints.clone(),
            transport,
            &config.registry.search_registries,
        );

        debug!(
            search_registries = ?config.registry.search_registries,
            "registry service ready"
        );

        Ok(Service {
            config,
            security,
            endpoints,
            authenticator,
            searcher,
        })
    }
}
