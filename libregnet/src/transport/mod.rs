//! HTTP transport for the registry handshake and V1 search APIs.
//!
//! The core modules only see the [`RegistryTransport`] and [`SearchSession`]
//! traits. [`HttpTransport`] implements them on top of reqwest and covers
//! just the calls needed for login and search: the `/v2/` ping and token
//! exchange, `/v1/users/`, `/v1/_ping` and `/v1/search`.
//!
//! Every attempt against an endpoint returns an [`AttemptError`]. Failures
//! showing the endpoint does not speak the protocol (no V2 version header,
//! connection refused, failed V1 ping) are `Fallback`; credential and server
//! failures once the protocol is established are `Fatal`.

use crate::auth::{AuthChallenge, AuthConfig, Credentials, LoginStatus};
use crate::config::Network;
use crate::endpoint::ApiEndpoint;
use crate::error::{AttemptError, Result, RegnetError};
use crate::security::TlsPolicy;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client as ReqwestClient, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;


/// Status reported for a successful login.
pub const LOGIN_SUCCEEDED: &str = "Login Succeeded";

const API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";
const V2_API_VERSION: &str = "registry/2.0";
const CLIENT_ID: &str = "regnet";
const SEARCH_SCOPE: &str = "registry:catalog:search";

/// Result of one attempt against one endpoint candidate.
pub type AttemptResult<T> = std::result::Result<T, AttemptError>;

/// One page of V1 search results as returned by an index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub num_results: usize,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub results: Vec<RemoteResult>,
}

/// A single repository as listed by an index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteResult {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub star_count: u64,
    #[serde(default)]
    pub is_official: bool,
    #[serde(default)]
    pub is_automated: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// An authorized connection to one index, able to run searches.
#[async_trait]
pub trait SearchSession: Send + Sync {
    /// Searches the index for repositories matching `term`, returning at
    /// most `limit` results.
    async fn search_repositories(&self, term: &str, limit: usize) -> Result<SearchResults>;
}

/// Network capability used by login and search.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Logs in with the V2 ping and token handshake.
    async fn login_v2(&self, endpoint: &ApiEndpoint, auth: &AuthConfig) -> AttemptResult<LoginStatus>;

    /// Logs in with V1 basic authentication.
    async fn login_v1(&self, endpoint: &ApiEndpoint, auth: &AuthConfig) -> AttemptResult<LoginStatus>;

    /// Opens a V1 search session, checking that the endpoint answers the V1 ping.
    async fn v1_session(
        &self,
        endpoint: &ApiEndpoint,
        auth: Option<&AuthConfig>,
    ) -> AttemptResult<Box<dyn SearchSession>>;

    /// Opens a search session authorized by exchanging the identity token
    /// for a V2 bearer token.
    async fn identity_token_session(
        &self,
        endpoint: &ApiEndpoint,
        auth: &AuthConfig,
    ) -> AttemptResult<Box<dyn SearchSession>>;
}

/// Configuration for the HTTP client.
///
/// # Examples
///
/// ```
/// use libregnet::transport::ClientConfig;
///
/// let config = ClientConfig::new()
///     .with_timeout(60)
///     .with_max_idle_per_host(20);
/// assert_eq!(config.timeout_seconds, 60);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
    /// Maximum idle connections per host (default: 10)
    pub max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_idle_per_host: 10,
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request timeout in seconds.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the maximum idle connections per host.
    pub fn with_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }
}

impl From<&Network> for ClientConfig {
    fn from(network: &Network) -> Self {
        Self {
            timeout_seconds: network.timeout,
            max_idle_per_host: network.max_idle_per_host,
        }
    }
}

/// Outcome of pinging `/v2/`.
#[derive(Debug)]
enum V2Ping {
    /// The registry answered without asking for credentials.
    Open,
    Challenge(AuthChallenge),
}

/// reqwest-backed [`RegistryTransport`].
///
/// Holds two connection pools: one with platform certificate
/// verification, and one that skips it for endpoints whose TLS policy is
/// [`TlsPolicy::SkipVerify`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    verified: ReqwestClient,
    unverified: ReqwestClient,
    timeout_seconds: u64,
}

impl HttpTransport {
    /// Creates a transport with default client settings.
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Creates a transport with custom client settings.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let build = |skip_verify: bool| {
            ReqwestClient::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .pool_max_idle_per_host(config.max_idle_per_host)
                .danger_accept_invalid_certs(skip_verify)
                .build()
                .map_err(|e| RegnetError::network_with_source("Failed to create HTTP client", e))
        };

        Ok(Self {
            verified: build(false)?,
            unverified: build(true)?,
            timeout_seconds: config.timeout_seconds,
        })
    }

    fn client_for(&self, endpoint: &ApiEndpoint) -> &ReqwestClient {
        match endpoint.tls {
            TlsPolicy::SkipVerify => &self.unverified,
            TlsPolicy::Strict | TlsPolicy::Plaintext => &self.verified,
        }
    }

    async fn ping_v2(&self, client: &ReqwestClient, endpoint: &ApiEndpoint) -> AttemptResult<V2Ping> {
        let url = join_url(&endpoint.url, "/v2/").map_err(AttemptError::Fallback)?;

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AttemptError::Fallback(self.translate_reqwest_error(e, url.as_str())))?;

        if !speaks_v2(&response) {
            return Err(AttemptError::Fallback(RegnetError::validation(format!(
                "{} does not support registry API v2",
                endpoint.url
            ))));
        }

        match response.status() {
            status if status.is_success() => Ok(V2Ping::Open),
            StatusCode::UNAUTHORIZED => {
                let header = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        AttemptError::Fallback(RegnetError::validation(
                            "401 response without WWW-Authenticate header",
                        ))
                    })?;
                let challenge = AuthChallenge::parse(header).map_err(AttemptError::Fallback)?;
                Ok(V2Ping::Challenge(challenge))
            }
            _ => Err(AttemptError::Fallback(
                Self::status_error(response).await,
            )),
        }
    }

    /// Exchanges credentials for a bearer token at the challenge realm.
    ///
    /// Identity tokens use the OAuth2 refresh grant; username and password
    /// use a basic-authenticated GET that asks for an offline token.
    async fn fetch_token(
        &self,
        client: &ReqwestClient,
        challenge: &AuthChallenge,
        auth: &AuthConfig,
        scope: Option<&str>,
    ) -> AttemptResult<TokenResponse> {
        let mut realm = Url::parse(&challenge.realm).map_err(|e| {
            AttemptError::Fatal(RegnetError::validation_with_source(
                format!("invalid token realm {}", challenge.realm),
                e,
            ))
        })?;
        let scope = scope.or(challenge.scope.as_deref());

        let request = if auth.has_identity_token() {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("grant_type", "refresh_token")
                .append_pair("refresh_token", &auth.identity_token)
                .append_pair("client_id", CLIENT_ID);
            if let Some(service) = &challenge.service {
                form.append_pair("service", service);
            }
            if let Some(scope) = scope {
                form.append_pair("scope", scope);
            }
            client
                .post(realm)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(form.finish())
        } else {
            {
                let mut query = realm.query_pairs_mut();
                query
                    .append_pair("offline_token", "true")
                    .append_pair("client_id", CLIENT_ID);
                if let Some(service) = &challenge.service {
                    query.append_pair("service", service);
                }
                if let Some(scope) = scope {
                    query.append_pair("scope", scope);
                }
            }
            let request = client.get(realm);
            match Credentials::from(auth).to_header_value() {
                Some(header) => request.header(AUTHORIZATION, header),
                None => request,
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Fatal(self.translate_reqwest_error(e, &challenge.realm)))?;
        let response = Self::check_response_status(response)
            .await
            .map_err(AttemptError::Fatal)?;

        response.json::<TokenResponse>().await.map_err(|e| {
            AttemptError::Fatal(RegnetError::validation_with_source(
                "Failed to parse token response",
                e,
            ))
        })
    }

    /// Resolves a ping challenge into request credentials and, for token
    /// logins, the refresh token the registry handed back.
    async fn authorize(
        &self,
        client: &ReqwestClient,
        challenge: &AuthChallenge,
        auth: &AuthConfig,
        scope: Option<&str>,
    ) -> AttemptResult<(Credentials, Option<String>)> {
        if challenge.is_basic() {
            return Ok((Credentials::from(auth), None));
        }
        if !challenge.is_bearer() {
            return Err(AttemptError::Fallback(RegnetError::validation(format!(
                "unsupported authentication scheme {}",
                challenge.scheme
            ))));
        }

        let token = self.fetch_token(client, challenge, auth, scope).await?;
        let bearer = token.access_token.or(token.token).ok_or_else(|| {
            AttemptError::Fatal(RegnetError::validation("token response carries no token"))
        })?;
        Ok((Credentials::bearer(bearer), token.refresh_token))
    }

    /// Translates a reqwest error into a RegnetError.
    fn translate_reqwest_error(&self, error: reqwest::Error, url: &str) -> RegnetError {
        if error.is_timeout() {
            RegnetError::network(format!(
                "Request to {} timed out after {} seconds",
                url, self.timeout_seconds
            ))
        } else if error.is_connect() {
            RegnetError::network_with_source(format!("Failed to connect to {}", url), error)
        } else if error.is_request() {
            RegnetError::network_with_source(format!("Failed to send request to {}", url), error)
        } else {
            RegnetError::network_with_source(
                format!("Network error communicating with {}", url),
                error,
            )
        }
    }

    /// Checks the HTTP response status and translates errors to RegnetError.
    async fn check_response_status(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(Self::status_error(response).await)
    }

    async fn status_error(response: Response) -> RegnetError {
        let status = response.status();
        let url = response.url().to_string();
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("(unable to read response body)"));

        match status {
            StatusCode::UNAUTHORIZED => RegnetError::authentication(
                format!("Authentication required for {}: {}", url, error_body),
                Some(401),
            ),
            StatusCode::FORBIDDEN => RegnetError::authentication(
                format!("Access forbidden for {}: {}", url, error_body),
                Some(403),
            ),
            StatusCode::NOT_FOUND => RegnetError::not_found("endpoint", &url),
            StatusCode::TOO_MANY_REQUESTS => {
                RegnetError::rate_limit(format!("Rate limit exceeded for {}", url), None)
            }
            StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => RegnetError::server(
                format!("Server error from {}: {}", url, error_body),
                status.as_u16(),
            ),
            _ => RegnetError::network(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                url,
                error_body
            )),
        }
    }
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn login_v2(&self, endpoint: &ApiEndpoint, auth: &AuthConfig) -> AttemptResult<LoginStatus> {
        let client = self.client_for(endpoint);

        let challenge = match self.ping_v2(client, endpoint).await? {
            V2Ping::Open => {
                debug!(url = %endpoint.url, "registry does not require authentication");
                return Ok(LoginStatus {
                    status: LOGIN_SUCCEEDED.to_string(),
                    identity_token: None,
                });
            }
            V2Ping::Challenge(challenge) => challenge,
        };

        let (credentials, refresh_token) = self.authorize(client, &challenge, auth, None).await?;

        let url = join_url(&endpoint.url, "/v2/")?;
        let mut request = client.get(url.clone());
        if let Some(header) = credentials.to_header_value() {
            request = request.header(AUTHORIZATION, header);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Fatal(self.translate_reqwest_error(e, url.as_str())))?;
        Self::check_response_status(response)
            .await
            .map_err(AttemptError::Fatal)?;

        Ok(LoginStatus {
            status: LOGIN_SUCCEEDED.to_string(),
            identity_token: refresh_token,
        })
    }

    async fn login_v1(&self, endpoint: &ApiEndpoint, auth: &AuthConfig) -> AttemptResult<LoginStatus> {
        let client = self.client_for(endpoint);
        let url = v1_url(&endpoint.url, "users/")?;

        let mut request = client.get(url.clone());
        if let Some(header) = Credentials::from(auth).to_header_value() {
            request = request.header(AUTHORIZATION, header);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Fallback(self.translate_reqwest_error(e, url.as_str())))?;

        match response.status() {
            StatusCode::OK => Ok(LoginStatus {
                status: LOGIN_SUCCEEDED.to_string(),
                identity_token: None,
            }),
            StatusCode::UNAUTHORIZED => Err(AttemptError::Fatal(RegnetError::authentication(
                "Wrong login/password, please try again",
                Some(401),
            ))),
            StatusCode::FORBIDDEN => Err(AttemptError::Fatal(RegnetError::authentication(
                "Account is not active",
                Some(403),
            ))),
            _ => Err(AttemptError::Fatal(Self::status_error(response).await)),
        }
    }

    async fn v1_session(
        &self,
        endpoint: &ApiEndpoint,
        auth: Option<&AuthConfig>,
    ) -> AttemptResult<Box<dyn SearchSession>> {
        let client = self.client_for(endpoint);
        let url = v1_url(&endpoint.url, "_ping").map_err(AttemptError::Fallback)?;

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AttemptError::Fallback(self.translate_reqwest_error(e, url.as_str())))?;
        Self::check_response_status(response)
            .await
            .map_err(AttemptError::Fallback)?;

        let authorization = auth.and_then(|a| Credentials::from(a).to_header_value());
        Ok(Box::new(HttpSearchSession {
            client: client.clone(),
            base: endpoint.url.clone(),
            authorization,
        }))
    }

    async fn identity_token_session(
        &self,
        endpoint: &ApiEndpoint,
        auth: &AuthConfig,
    ) -> AttemptResult<Box<dyn SearchSession>> {
        let client = self.client_for(endpoint);

        let authorization = match self.ping_v2(client, endpoint).await? {
            V2Ping::Open => None,
            V2Ping::Challenge(challenge) if challenge.is_bearer() => {
                let (credentials, _) = self
                    .authorize(client, &challenge, auth, Some(SEARCH_SCOPE))
                    .await?;
                credentials.to_header_value()
            }
            V2Ping::Challenge(challenge) => {
                return Err(AttemptError::Fallback(RegnetError::validation(format!(
                    "identity tokens need bearer authentication, registry offers {}",
                    challenge.scheme
                ))));
            }
        };

        debug!(url = %endpoint.url, "using v2 token for search");
        Ok(Box::new(HttpSearchSession {
            client: client.clone(),
            base: endpoint.url.clone(),
            authorization,
        }))
    }
}

/// V1 search session bound to one index.
struct HttpSearchSession {
    client: ReqwestClient,
    base: Url,
    authorization: Option<String>,
}

#[async_trait]
impl SearchSession for HttpSearchSession {
    async fn search_repositories(&self, term: &str, limit: usize) -> Result<SearchResults> {
        let mut url = v1_url(&self.base, "search")?;
        url.query_pairs_mut()
            .append_pair("q", term)
            .append_pair("n", &limit.to_string());

        let mut request = self.client.get(url.clone());
        if let Some(header) = &self.authorization {
            request = request.header(AUTHORIZATION, header);
        }

        let response = request.send().await.map_err(|e| {
            RegnetError::network_with_source(format!("Failed to search {}", url), e)
        })?;
        let response = HttpTransport::check_response_status(response).await?;

        let body = response.bytes().await.map_err(|e| {
            RegnetError::network_with_source(format!("Failed to read search response from {}", url), e)
        })?;
        serde_json::from_slice(&body).map_err(|e| {
            RegnetError::validation_with_source(
                format!("Failed to parse search response from {}", url),
                e,
            )
        })
    }
}

/// Returns true when the response advertises the V2 API.
fn speaks_v2(response: &Response) -> bool {
    response
        .headers()
        .get_all(API_VERSION_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split([',', ' ']))
        .any(|v| v.trim() == V2_API_VERSION)
}

fn join_url(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| RegnetError::validation_with_source(format!("invalid URL {}{}", base, path), e))
}

/// Joins `path` under the V1 API root of `base`, which may or may not
/// already end in `/v1/`.
fn v1_url(base: &Url, path: &str) -> Result<Url> {
    if base.path().ends_with("/v1/") {
        join_url(base, path)
    } else {
        join_url(base, &format!("/v1/{}", path))
    }
}
