//! Endpoint resolution.
//!
//! Turns a registry hostname into the ordered list of API endpoints a
//! caller should try: mirrors before the registry itself (pulls only), V2
//! before V1, HTTPS before plain HTTP. Plain HTTP is only ever offered for
//! hosts the [`SecurityConfig`] classifies as insecure.
//!
//! Reachability is not tested here; callers attempt the endpoints in order.

use crate::config::{DEFAULT_V1_REGISTRY, DEFAULT_V2_REGISTRY, INDEX_SERVER};
use crate::error::{Result, RegnetError};
use crate::security::{IndexInfo, SecurityConfig, TlsPolicy, validate_host_port};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[cfg(test)]
mod tests;

/// Registry API generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V1,
    V2,
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => f.write_str("v1"),
            Self::V2 => f.write_str("v2"),
        }
    }
}

/// What the endpoints will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Mirrors are eligible.
    Pull,
    /// Mirrors are never used.
    Push,
}

/// A candidate remote API endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub url: Url,
    pub version: ApiVersion,
    pub mirror: bool,
    pub official: bool,
    pub secure: bool,
    /// Repository names are sent without the hostname prefix.
    pub trim_hostname: bool,
    pub allow_nondistributable_artifacts: bool,
    pub tls: TlsPolicy,
}

/// Resolves hostnames into ordered endpoint candidates.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    security: Arc<SecurityConfig>,
}

impl EndpointResolver {
    /// Creates a resolver reading from `security`.
    pub fn new(security: Arc<SecurityConfig>) -> Self {
        Self { security }
    }

    /// Returns the shared trust configuration.
    pub fn security(&self) -> &Arc<SecurityConfig> {
        &self.security
    }

    /// Runs `resolve` against this resolver on the blocking thread pool.
    ///
    /// Classification may wait on the system resolver; async callers resolve
    /// through here so the lookup never occupies a runtime worker.
    pub async fn run_blocking<T, F>(&self, resolve: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&EndpointResolver) -> Result<T> + Send + 'static,
    {
        let resolver = self.clone();
        tokio::task::spawn_blocking(move || resolve(&resolver))
            .await
            .map_err(|e| RegnetError::network_with_source("host resolution did not complete", e))?
    }

    /// Endpoints to pull from, in order of preference.
    pub fn lookup_pull_endpoints(&self, hostname: &str) -> Result<Vec<ApiEndpoint>> {
        self.lookup(hostname, Purpose::Pull)
    }

    /// Endpoints to push to, in order of preference. Mirrors are not included.
    pub fn lookup_push_endpoints(&self, hostname: &str) -> Result<Vec<ApiEndpoint>> {
        self.lookup(hostname, Purpose::Push)
    }

    /// Resolves `hostname` (`host[:port]`) into ordered endpoint candidates.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::config::RegistryOptions;
    /// use libregnet::endpoint::{ApiVersion, EndpointResolver, Purpose};
    /// use libregnet::security::SecurityConfig;
    /// use std::sync::Arc;
    ///
    /// let security = Arc::new(SecurityConfig::new(&RegistryOptions::default()).unwrap());
    /// let resolver = EndpointResolver::new(security);
    ///
    /// let endpoints = resolver.lookup("docker.io", Purpose::Push).unwrap();
    /// assert_eq!(endpoints[0].version, ApiVersion::V2);
    /// assert_eq!(endpoints[0].url.as_str(), "https://registry-1.docker.io/");
    /// ```
    pub fn lookup(&self, hostname: &str, purpose: Purpose) -> Result<Vec<ApiEndpoint>> {
        validate_host_port(hostname).map_err(|_| RegnetError::invalid_hostname(hostname))?;

        let config = self.security.snapshot();
        let resolver = self.security.resolver();
        let classification = config.classify(hostname, resolver);
        let allow_nondistributable = config.allow_nondistributable_artifacts(hostname, resolver);

        let mut endpoints = Vec::new();

        if purpose == Purpose::Pull {
            for mirror in &config.mirrors {
                let mirror_class = config.classify(&host_port(mirror), resolver);
                let tls = if mirror.scheme() == "http" {
                    TlsPolicy::Plaintext
                } else {
                    mirror_class.tls_policy()
                };
                endpoints.push(ApiEndpoint {
                    url: mirror.clone(),
                    version: ApiVersion::V2,
                    mirror: true,
                    official: false,
                    secure: mirror_class.secure,
                    trim_hostname: true,
                    allow_nondistributable_artifacts: false,
                    tls,
                });
            }
        }

        let v2_url = if classification.official {
            parse_url(DEFAULT_V2_REGISTRY)?
        } else {
            parse_url(&format!("https://{}", hostname))?
        };
        endpoints.push(ApiEndpoint {
            url: v2_url,
            version: ApiVersion::V2,
            mirror: false,
            official: classification.official,
            secure: classification.secure,
            trim_hostname: true,
            allow_nondistributable_artifacts: allow_nondistributable,
            tls: classification.tls_policy(),
        });

        if !config.v2_only {
            let v1_url = if classification.official {
                parse_url(DEFAULT_V1_REGISTRY)?
            } else {
                parse_url(&format!("https://{}", hostname))?
            };
            endpoints.push(ApiEndpoint {
                url: v1_url,
                version: ApiVersion::V1,
                mirror: false,
                official: classification.official,
                secure: classification.secure,
                trim_hostname: false,
                allow_nondistributable_artifacts: allow_nondistributable,
                tls: classification.tls_policy(),
            });

            if !classification.secure {
                endpoints.push(ApiEndpoint {
                    url: parse_url(&format!("http://{}", hostname))?,
                    version: ApiVersion::V1,
                    mirror: false,
                    official: false,
                    secure: false,
                    trim_hostname: false,
                    allow_nondistributable_artifacts: allow_nondistributable,
                    tls: TlsPolicy::Plaintext,
                });
            }
        }

        debug!(hostname, ?purpose, count = endpoints.len(), "resolved endpoints");
        Ok(endpoints)
    }

    /// V1 search endpoints for an index, HTTPS first.
    pub fn search_endpoints(&self, index: &IndexInfo) -> Result<Vec<ApiEndpoint>> {
        if index.official {
            return Ok(vec![ApiEndpoint {
                url: parse_url(INDEX_SERVER)?,
                version: ApiVersion::V1,
                mirror: false,
                official: true,
                secure: true,
                trim_hostname: false,
                allow_nondistributable_artifacts: false,
                tls: TlsPolicy::Strict,
            }]);
        }

        let https = ApiEndpoint {
            url: parse_url(&format!("https://{}/v1/", index.name))?,
            version: ApiVersion::V1,
            mirror: false,
            official: false,
            secure: index.secure,
            trim_hostname: false,
            allow_nondistributable_artifacts: false,
            tls: if index.secure {
                TlsPolicy::Strict
            } else {
                TlsPolicy::SkipVerify
            },
        };

        let mut endpoints = vec![https];
        if !index.secure {
            endpoints.push(ApiEndpoint {
                url: parse_url(&format!("http://{}/v1/", index.name))?,
                tls: TlsPolicy::Plaintext,
                ..endpoints[0].clone()
            });
        }

        Ok(endpoints)
    }
}

fn parse_url(s: &str) -> Result<Url> {
    Url::parse(s).map_err(|e| RegnetError::validation_with_source(format!("invalid URL {}", s), e))
}

/// `host[:port]` of a URL, the form the security configuration is keyed by.
fn host_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}
