use super::*;
use crate::endpoint::ApiVersion;
use crate::error::AttemptError;
use crate::transport::{AttemptResult, LOGIN_SUCCEEDED, RemoteResult, SearchResults, SearchSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::net::IpAddr;

/// Transport accepting every login on V2 and answering every search with
/// one repository named after the queried term.
#[derive(Default)]
struct AcceptAll {
    logins: Mutex<Vec<(ApiVersion, String)>>,
}

struct EchoSession {
    host: String,
}

#[async_trait]
impl SearchSession for EchoSession {
    async fn search_repositories(&self, term: &str, _limit: usize) -> Result<SearchResults> {
        Ok(SearchResults {
            num_results: 1,
            query: term.to_string(),
            results: vec![RemoteResult {
                name: term.to_string(),
                description: format!("served by {}", self.host),
                star_count: 7,
                ..RemoteResult::default()
            }],
        })
    }
}

#[async_trait]
impl RegistryTransport for AcceptAll {
    async fn login_v2(&self, endpoint: &ApiEndpoint, _auth: &AuthConfig) -> AttemptResult<LoginStatus> {
        self.logins
            .lock()
            .push((endpoint.version, endpoint.url.to_string()));
        Ok(LoginStatus {
            status: LOGIN_SUCCEEDED.to_string(),
            identity_token: None,
        })
    }

    async fn login_v1(&self, endpoint: &ApiEndpoint, _auth: &AuthConfig) -> AttemptResult<LoginStatus> {
        self.logins
            .lock()
            .push((endpoint.version, endpoint.url.to_string()));
        Err(AttemptError::Fatal(RegnetError::validation("v1 not expected")))
    }

    async fn v1_session(
        &self,
        endpoint: &ApiEndpoint,
        _auth: Option<&AuthConfig>,
    ) -> AttemptResult<Box<dyn SearchSession>> {
        Ok(Box::new(EchoSession {
            host: endpoint.url.host_str().unwrap_or_default().to_string(),
        }))
    }

    async fn identity_token_session(
        &self,
        _endpoint: &ApiEndpoint,
        _auth: &AuthConfig,
    ) -> AttemptResult<Box<dyn SearchSession>> {
        Err(AttemptError::Fallback(RegnetError::validation("no v2 auth")))
    }
}

struct NoDns;

impl HostResolver for NoDns {
    fn resolve(&self, _host: &str) -> Vec<IpAddr> {
        Vec::new()
    }
}

fn service_with(config: Config, transport: Arc<AcceptAll>) -> Service {
    ServiceBuilder::new()
        .with_config(config)
        .with_transport(transport)
        .with_resolver(Arc::new(NoDns))
        .build()
        .unwrap()
}

fn service() -> Service {
    service_with(Config::default(), Arc::new(AcceptAll::default()))
}

#[test]
fn test_builder_defaults() {
    let service = ServiceBuilder::default()
        .with_resolver(Arc::new(NoDns))
        .build()
        .unwrap();

    assert_eq!(service.config(), &Config::default());
    assert!(service.service_config().mirrors.is_empty());
}

#[test]
fn test_builder_loads_config_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "registry:\n  search_registries: [\"reg.example.com\"]\n  v2_only: true"
    )
    .unwrap();

    let service = ServiceBuilder::new()
        .with_config_file(file.path())
        .with_transport(Arc::new(AcceptAll::default()))
        .with_resolver(Arc::new(NoDns))
        .build()
        .unwrap();

    assert_eq!(
        service.config().registry.search_registries,
        vec!["reg.example.com".to_string()]
    );
    assert!(service.service_config().v2_only);
}

#[test]
fn test_builder_explicit_config_wins_over_file() {
    let service = ServiceBuilder::new()
        .with_config_file("/nonexistent/regnet.yaml")
        .with_config(Config::default())
        .with_transport(Arc::new(AcceptAll::default()))
        .with_resolver(Arc::new(NoDns))
        .build();

    assert!(service.is_ok());
}

#[test]
fn test_builder_missing_config_file_fails() {
    let result = ServiceBuilder::new()
        .with_config_file("/nonexistent/regnet.yaml")
        .with_resolver(Arc::new(NoDns))
        .build();

    assert!(matches!(result, Err(RegnetError::Config { .. })));
}

#[test]
fn test_builder_rejects_invalid_trust_options() {
    let mut config = Config::default();
    config.registry.mirrors = vec!["ftp://mirror.example.com".to_string()];

    let result = ServiceBuilder::new()
        .with_config(config)
        .with_transport(Arc::new(AcceptAll::default()))
        .with_resolver(Arc::new(NoDns))
        .build();

    assert!(matches!(result, Err(RegnetError::InvalidConfigEntry { .. })));
}

#[test]
fn test_resolve_official_repository() {
    let reference = Reference::parse("ubuntu:22.04").unwrap();
    let info = service().resolve_repository(&reference).unwrap();

    assert_eq!(info.index.name, "docker.io");
    assert!(info.index.official);
    assert!(info.index.secure);
    assert!(info.official);
    assert_eq!(info.name.to_string(), "docker.io/library/ubuntu:22.04");
}

#[test]
fn test_resolve_index_alias_is_normalized() {
    let reference = Reference::parse("index.docker.io/library/ubuntu").unwrap();
    let info = service().resolve_repository(&reference).unwrap();

    assert_eq!(info.index.name, "docker.io");
    assert_eq!(info.name.name(), "docker.io/library/ubuntu");
    assert!(info.official);
}

#[test]
fn test_resolve_user_repository_on_official_index() {
    let reference = Reference::parse("bitnami/redis").unwrap();
    let info = service().resolve_repository(&reference).unwrap();

    assert!(info.index.official);
    assert!(!info.official);
    assert_eq!(info.name.name(), "docker.io/bitnami/redis");
}

#[test]
fn test_resolve_private_repository() {
    let reference = Reference::parse("10.1.2.3:5000/team/app").unwrap();
    let info = service().resolve_repository(&reference).unwrap();

    assert_eq!(info.index.name, "10.1.2.3:5000");
    assert!(!info.index.official);
    assert!(!info.index.secure);
    assert!(!info.official);
    assert_eq!(info.name.name(), "10.1.2.3:5000/team/app");
}

#[test]
fn test_tls_policy() {
    let service = service();

    assert_eq!(service.tls_policy("docker.io").unwrap(), TlsPolicy::Strict);
    assert_eq!(service.tls_policy("reg.example.com").unwrap(), TlsPolicy::Strict);

    service.load_insecure_registries(&["reg.example.com"]).unwrap();
    assert_eq!(service.tls_policy("reg.example.com").unwrap(), TlsPolicy::SkipVerify);

    assert!(matches!(
        service.tls_policy("bad host"),
        Err(RegnetError::InvalidHostname { .. })
    ));
}

#[test]
fn test_reloads_are_visible_to_lookups() {
    let service = service();
    assert_eq!(service.lookup_pull_endpoints("docker.io").unwrap().len(), 2);

    service.load_mirrors(&["https://mirror.example.com"]).unwrap();
    let pull = service.lookup_pull_endpoints("docker.io").unwrap();
    assert_eq!(pull.len(), 3);
    assert!(pull[0].mirror);
    assert_eq!(pull[0].url.as_str(), "https://mirror.example.com/");

    let push = service.lookup_push_endpoints("docker.io").unwrap();
    assert!(push.iter().all(|e| !e.mirror));
}

#[test]
fn test_failed_reload_keeps_previous_state() {
    let service = service();
    service.load_mirrors(&["https://mirror.example.com"]).unwrap();

    assert!(service.load_mirrors(&["not a url"]).is_err());
    assert_eq!(service.service_config().mirrors.len(), 1);
}

#[test]
fn test_load_allow_nondistributable_artifacts() {
    let service = service();
    service
        .load_allow_nondistributable_artifacts(&["artifacts.example.com"])
        .unwrap();

    let endpoints = service.lookup_push_endpoints("artifacts.example.com").unwrap();
    assert!(endpoints.iter().all(|e| e.allow_nondistributable_artifacts));
}

#[tokio::test]
async fn test_auth_uses_configured_transport() {
    let transport = Arc::new(AcceptAll::default());
    let service = service_with(Config::default(), Arc::clone(&transport));

    let auth = AuthConfig::basic("alice", "secret", "reg.example.com");
    let status = service.auth(&auth).await.unwrap();

    assert_eq!(status.status, LOGIN_SUCCEEDED);
    assert_eq!(
        transport.logins.lock().clone(),
        vec![(ApiVersion::V2, "https://reg.example.com/".to_string())]
    );
}

#[tokio::test]
async fn test_search_fans_out_to_configured_registries() {
    let mut config = Config::default();
    config.registry.search_registries =
        vec!["docker.io".to_string(), "reg.example.com".to_string()];
    let service = service_with(config, Arc::new(AcceptAll::default()));

    let results = service.search("nginx", None, None, false).await.unwrap();

    let indexes: Vec<_> = results.iter().map(|r| r.index_name.as_str()).collect();
    assert_eq!(indexes, vec!["docker.io", "reg.example.com"]);
    assert!(results.iter().all(|r| r.name == "nginx"));
}

#[test]
fn test_configured_default_registries_drive_normalization() {
    let mut config = Config::default();
    config.registry.default_registries =
        vec!["docker.io".to_string(), "hub.corp.example.com".to_string()];
    let service = service_with(config, Arc::new(AcceptAll::default()));

    let reference = service.parse_reference("hub.corp.example.com/ubuntu:22.04").unwrap();
    assert_eq!(reference.path(), "library/ubuntu");
    assert_eq!(service.familiar_string(&reference), "ubuntu:22.04");

    let info = service.resolve_repository(&reference).unwrap();
    assert!(info.index.official);
    assert!(info.official);
    assert_eq!(info.name.name(), "docker.io/library/ubuntu");

    let builtin = Reference::parse("hub.corp.example.com/ubuntu").unwrap();
    assert_eq!(builtin.path(), "ubuntu");
}
