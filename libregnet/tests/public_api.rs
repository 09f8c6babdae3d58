use libregnet::{
    ApiVersion, AuthConfig, Config, Reference, RegnetError, Service, ServiceBuilder, TlsPolicy,
};

fn offline_service(config: Config) -> Service {
    ServiceBuilder::new().with_config(config).build().unwrap()
}

#[test]
fn test_service_builder_default() {
    let service = ServiceBuilder::default().build().unwrap();
    assert_eq!(service.config().registry.search_registries, vec!["docker.io".to_string()]);
}

#[test]
fn test_version_is_set() {
    assert!(!libregnet::version().is_empty());
}

#[test]
fn test_official_pull_endpoints() {
    let service = offline_service(Config::default());

    let endpoints = service.lookup_pull_endpoints("docker.io").unwrap();
    let urls: Vec<_> = endpoints.iter().map(|e| (e.version, e.url.as_str())).collect();
    assert_eq!(
        urls,
        vec![
            (ApiVersion::V2, "https://registry-1.docker.io/"),
            (ApiVersion::V1, "https://index.docker.io/"),
        ]
    );
    assert!(endpoints.iter().all(|e| e.official && e.tls == TlsPolicy::Strict));
}

#[test]
fn test_configured_mirrors_come_first() {
    let config = Config::from_yaml_str(
        "registry:\n  mirrors: [\"https://m1.example.com\", \"https://m2.example.com\"]",
    )
    .unwrap();
    let service = offline_service(config);

    let endpoints = service.lookup_pull_endpoints("docker.io").unwrap();
    let hosts: Vec<_> = endpoints.iter().filter_map(|e| e.url.host_str()).collect();
    assert_eq!(
        hosts,
        vec!["m1.example.com", "m2.example.com", "registry-1.docker.io", "index.docker.io"]
    );
}

#[test]
fn test_resolve_repository_through_facade() {
    let service = offline_service(Config::default());

    let info = service
        .resolve_repository(&Reference::parse("library/redis:7").unwrap())
        .unwrap();
    assert!(info.official);
    assert_eq!(info.name.familiar_string(), "redis:7");
}

#[tokio::test]
async fn test_search_rejects_scheme() {
    let service = offline_service(Config::default());

    let result = service
        .search("https://reg.example.com/app", None, None, false)
        .await;
    assert!(matches!(result, Err(RegnetError::InvalidFormat { .. })));
}

#[tokio::test]
async fn test_search_without_registries() {
    let mut config = Config::default();
    config.registry.search_registries.clear();
    let service = offline_service(config);

    let result = service.search("nginx", None, None, false).await;
    assert!(matches!(result, Err(RegnetError::NoConfiguredRepository)));
}

#[tokio::test]
async fn test_login_without_server() {
    let mut config = Config::default();
    config.registry.index_server.clear();
    let service = offline_service(config);

    let result = service.auth(&AuthConfig::basic("alice", "secret", "")).await;
    assert!(matches!(result, Err(RegnetError::NoConfiguredRegistry)));
}
