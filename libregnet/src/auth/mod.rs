//! Registry authentication.
//!
//! This module holds the credential shapes handed to a registry, the
//! WWW-Authenticate challenge parser used by the V2 token handshake, and
//! the [`Authenticator`] that walks the resolved endpoint candidates until
//! one of them accepts the credentials.

use crate::endpoint::{ApiEndpoint, ApiVersion, EndpointResolver};
use crate::error::{AttemptError, Result, RegnetError};
use crate::transport::RegistryTransport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;


/// Credentials supplied by a caller for one login or search.
///
/// Empty strings mean "not set".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub server_address: String,
    /// Refresh token issued by a previous V2 login.
    #[serde(default)]
    pub identity_token: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("server_address", &self.server_address)
            .field("identity_token", &redacted(&self.identity_token))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "<redacted>" }
}

impl AuthConfig {
    /// Creates username/password credentials for `server_address`.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::auth::AuthConfig;
    ///
    /// let auth = AuthConfig::basic("alice", "s3cret", "registry.example.com");
    /// assert_eq!(auth.username, "alice");
    /// assert!(auth.identity_token.is_empty());
    /// ```
    pub fn basic(
        username: impl Into<String>,
        password: impl Into<String>,
        server_address: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            server_address: server_address.into(),
            identity_token: String::new(),
        }
    }

    /// Returns a copy carrying `token` as identity token.
    pub fn with_identity_token(mut self, token: impl Into<String>) -> Self {
        self.identity_token = token.into();
        self
    }

    /// Returns true when an identity token is present.
    pub fn has_identity_token(&self) -> bool {
        !self.identity_token.is_empty()
    }
}

/// Credentials as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// No authentication required (anonymous access)
    Anonymous,

    /// HTTP Basic authentication with username and password
    Basic {
        /// Username for authentication
        username: String,
        /// Password for authentication
        password: String,
    },

    /// Bearer token authentication (OAuth2-style)
    Bearer {
        /// The bearer token
        token: String,
    },
}

impl Credentials {
    /// Creates Basic authentication credentials.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::auth::Credentials;
    ///
    /// let creds = Credentials::basic("username", "password");
    /// assert!(creds.to_header_value().unwrap().starts_with("Basic "));
    /// ```
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates Bearer token credentials.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Returns the Authorization header value for these credentials.
    pub fn to_header_value(&self) -> Option<String> {
        match self {
            Self::Anonymous => None,
            Self::Basic { username, password } => {
                use base64::{Engine as _, engine::general_purpose};
                let credentials = format!("{}:{}", username, password);
                let encoded = general_purpose::STANDARD.encode(credentials);
                Some(format!("Basic {}", encoded))
            }
            Self::Bearer { token } => Some(format!("Bearer {}", token)),
        }
    }
}

impl From<&AuthConfig> for Credentials {
    fn from(auth: &AuthConfig) -> Self {
        if auth.username.is_empty() {
            Self::Anonymous
        } else {
            Self::basic(auth.username.clone(), auth.password.clone())
        }
    }
}

/// Information parsed from a WWW-Authenticate header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// The authentication scheme (e.g., "Bearer")
    pub scheme: String,

    /// The authentication realm
    pub realm: String,

    /// The service identifier
    pub service: Option<String>,

    /// The scope being requested
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parses a WWW-Authenticate header value.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::auth::AuthChallenge;
    ///
    /// let header = r#"Bearer realm="https://auth.example.com/token",service="registry""#;
    /// let challenge = AuthChallenge::parse(header).unwrap();
    /// assert_eq!(challenge.scheme, "Bearer");
    /// assert!(challenge.is_bearer());
    /// ```
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();

        let (scheme, params) = header
            .split_once(' ')
            .ok_or_else(|| RegnetError::validation("Invalid WWW-Authenticate header format"))?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;

        for param in params.split(',') {
            let param = param.trim();
            if let Some((key, value)) = param.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                match key {
                    "realm" => realm = Some(value.to_string()),
                    "service" => service = Some(value.to_string()),
                    "scope" => scope = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        let realm = realm.ok_or_else(|| {
            RegnetError::validation("WWW-Authenticate header missing required 'realm' parameter")
        })?;

        Ok(Self {
            scheme: scheme.to_string(),
            realm,
            service,
            scope,
        })
    }

    pub fn is_bearer(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("bearer")
    }

    pub fn is_basic(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("basic")
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStatus {
    pub status: String,
    /// Refresh token to store in place of the password, when the registry issued one.
    pub identity_token: Option<String>,
}

/// Logs in against the endpoints of a registry, falling back from V2 to V1.
pub struct Authenticator {
    resolver: EndpointResolver,
    transport: Arc<dyn RegistryTransport>,
    index_server: String,
}

impl Authenticator {
    /// Creates an authenticator.
    ///
    /// `index_server` is the login target used when credentials carry no
    /// server address.
    pub fn new(
        resolver: EndpointResolver,
        transport: Arc<dyn RegistryTransport>,
        index_server: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            transport,
            index_server: index_server.into(),
        }
    }

    /// Validates `auth` against its registry.
    ///
    /// # Errors
    ///
    /// - `NoConfiguredRegistry` if no server address can be determined
    /// - `InvalidHostname` if the address does not name a usable host
    /// - the first fatal attempt error, or the last fallback error when
    ///   every endpoint fell back
    pub async fn login(&self, auth: &AuthConfig) -> Result<LoginStatus> {
        let mut server_address = auth.server_address.trim().to_string();
        if server_address.is_empty() {
            server_address = self.index_server.clone();
        }
        if server_address.is_empty() {
            return Err(RegnetError::NoConfiguredRegistry);
        }

        if !server_address.starts_with("https://") && !server_address.starts_with("http://") {
            server_address = format!("https://{}", server_address);
        }

        let url =
            Url::parse(&server_address).map_err(|_| RegnetError::invalid_hostname(&server_address))?;
        let host = url
            .host_str()
            .ok_or_else(|| RegnetError::invalid_hostname(&server_address))?;
        let hostname = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        debug!(hostname = %hostname, "logging in");
        let endpoints = self
            .resolver
            .run_blocking(move |resolver| resolver.lookup_push_endpoints(&hostname))
            .await?;
        self.login_endpoints(auth, &endpoints).await
    }

    /// Attempts login against `endpoints` in order.
    ///
    /// The first success wins. A fallback error moves on to the next
    /// endpoint; any other error is returned immediately.
    pub async fn login_endpoints(
        &self,
        auth: &AuthConfig,
        endpoints: &[ApiEndpoint],
    ) -> Result<LoginStatus> {
        let mut last_error = None;

        for endpoint in endpoints {
            let attempt = match endpoint.version {
                ApiVersion::V2 => self.transport.login_v2(endpoint, auth).await,
                ApiVersion::V1 => self.transport.login_v1(endpoint, auth).await,
            };

            match attempt {
                Ok(status) => return Ok(status),
                Err(AttemptError::Fallback(err)) => {
                    info!(
                        version = %endpoint.version,
                        url = %endpoint.url,
                        error = %err,
                        "error logging in to endpoint, trying next endpoint"
                    );
                    last_error = Some(err);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
            }
        }

        Err(last_error.unwrap_or(RegnetError::NoConfiguredRegistry))
    }
}
