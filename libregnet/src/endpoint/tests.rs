use super::*;
use crate::config::RegistryOptions;
use crate::security::HostResolver;
use std::net::IpAddr;

struct LocalhostOnly;

impl HostResolver for LocalhostOnly {
    fn resolve(&self, host: &str) -> Vec<IpAddr> {
        match host {
            "localhost" => vec!["127.0.0.1".parse().unwrap()],
            _ => Vec::new(),
        }
    }
}

fn resolver_with(options: RegistryOptions) -> EndpointResolver {
    let security = SecurityConfig::with_resolver(&options, Arc::new(LocalhostOnly)).unwrap();
    EndpointResolver::new(Arc::new(security))
}

fn urls(endpoints: &[ApiEndpoint]) -> Vec<String> {
    endpoints.iter().map(|e| e.url.to_string()).collect()
}

#[test]
fn test_secure_host_with_mirrors_pull_order() {
    let resolver = resolver_with(RegistryOptions {
        mirrors: vec![
            "https://m1.example.com".to_string(),
            "https://m2.example.com".to_string(),
        ],
        ..RegistryOptions::default()
    });

    let endpoints = resolver.lookup_pull_endpoints("reg.example.com").unwrap();

    assert_eq!(
        urls(&endpoints),
        vec![
            "https://m1.example.com/",
            "https://m2.example.com/",
            "https://reg.example.com/",
            "https://reg.example.com/",
        ]
    );
    assert!(endpoints[0].mirror && endpoints[1].mirror);
    assert_eq!(endpoints[2].version, ApiVersion::V2);
    assert!(!endpoints[2].mirror);
    assert_eq!(endpoints[3].version, ApiVersion::V1);
    assert!(endpoints.iter().all(|e| e.url.scheme() == "https"));
    assert!(endpoints.iter().all(|e| e.tls == TlsPolicy::Strict));
}

#[test]
fn test_push_never_includes_mirrors() {
    let resolver = resolver_with(RegistryOptions {
        mirrors: vec!["https://m1.example.com".to_string()],
        ..RegistryOptions::default()
    });

    let endpoints = resolver.lookup_push_endpoints("reg.example.com").unwrap();
    assert_eq!(endpoints.len(), 2);
    assert!(endpoints.iter().all(|e| !e.mirror));
}

#[test]
fn test_insecure_host_gets_plain_http_last() {
    let resolver = resolver_with(RegistryOptions::default());

    let endpoints = resolver.lookup_push_endpoints("localhost:5000").unwrap();

    assert_eq!(
        urls(&endpoints),
        vec![
            "https://localhost:5000/",
            "https://localhost:5000/",
            "http://localhost:5000/",
        ]
    );
    assert_eq!(endpoints[0].tls, TlsPolicy::SkipVerify);
    assert_eq!(endpoints[1].tls, TlsPolicy::SkipVerify);
    assert_eq!(endpoints[2].tls, TlsPolicy::Plaintext);
    assert!(endpoints.iter().all(|e| !e.secure));
}

#[test]
fn test_official_host_uses_canonical_urls() {
    let resolver = resolver_with(RegistryOptions::default());

    for host in ["docker.io", "index.docker.io"] {
        let endpoints = resolver.lookup_push_endpoints(host).unwrap();
        assert_eq!(
            urls(&endpoints),
            vec!["https://registry-1.docker.io/", "https://index.docker.io/"]
        );
        assert!(endpoints.iter().all(|e| e.official && e.secure));
    }
}

#[test]
fn test_v2_only_drops_v1_endpoints() {
    let resolver = resolver_with(RegistryOptions {
        v2_only: true,
        ..RegistryOptions::default()
    });

    let endpoints = resolver.lookup_push_endpoints("localhost:5000").unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].version, ApiVersion::V2);
}

#[test]
fn test_v2_endpoints_trim_hostname() {
    let resolver = resolver_with(RegistryOptions::default());
    let endpoints = resolver.lookup_push_endpoints("reg.example.com").unwrap();

    assert!(endpoints[0].trim_hostname);
    assert!(!endpoints[1].trim_hostname);
}

#[test]
fn test_http_mirror_is_plaintext() {
    let resolver = resolver_with(RegistryOptions {
        mirrors: vec!["http://mirror.lan:5000".to_string()],
        ..RegistryOptions::default()
    });

    let endpoints = resolver.lookup_pull_endpoints("reg.example.com").unwrap();
    assert_eq!(endpoints[0].tls, TlsPolicy::Plaintext);
}

#[test]
fn test_nondistributable_flag_is_carried() {
    let resolver = resolver_with(RegistryOptions {
        allow_nondistributable_artifacts: vec!["reg.example.com".to_string()],
        ..RegistryOptions::default()
    });

    let endpoints = resolver.lookup_push_endpoints("reg.example.com").unwrap();
    assert!(endpoints.iter().all(|e| e.allow_nondistributable_artifacts));

    let endpoints = resolver.lookup_push_endpoints("other.example.com").unwrap();
    assert!(endpoints.iter().all(|e| !e.allow_nondistributable_artifacts));
}

#[test]
fn test_lookup_rejects_invalid_hostname() {
    let resolver = resolver_with(RegistryOptions::default());

    for host in ["", "bad host", "reg..example.com", "reg.example.com:0"] {
        assert!(matches!(
            resolver.lookup_pull_endpoints(host),
            Err(RegnetError::InvalidHostname { .. })
        ));
    }
}

#[test]
fn test_lookup_sees_reloaded_configuration() {
    let resolver = resolver_with(RegistryOptions::default());
    assert_eq!(resolver.lookup_pull_endpoints("reg.example.com").unwrap().len(), 2);

    resolver
        .security()
        .load_mirrors(&["https://mirror.example.com"])
        .unwrap();

    assert_eq!(resolver.lookup_pull_endpoints("reg.example.com").unwrap().len(), 3);
}

#[test]
fn test_search_endpoints_official() {
    let resolver = resolver_with(RegistryOptions::default());
    let index = resolver.security().index_info("docker.io").unwrap();

    let endpoints = resolver.search_endpoints(&index).unwrap();
    assert_eq!(urls(&endpoints), vec!["https://index.docker.io/v1/"]);
}

#[test]
fn test_search_endpoints_secure_and_insecure() {
    let resolver = resolver_with(RegistryOptions::default());

    let index = resolver.security().index_info("reg.example.com").unwrap();
    let endpoints = resolver.search_endpoints(&index).unwrap();
    assert_eq!(urls(&endpoints), vec!["https://reg.example.com/v1/"]);

    let index = resolver.security().index_info("localhost:5000").unwrap();
    let endpoints = resolver.search_endpoints(&index).unwrap();
    assert_eq!(
        urls(&endpoints),
        vec!["https://localhost:5000/v1/", "http://localhost:5000/v1/"]
    );
    assert_eq!(endpoints[1].tls, TlsPolicy::Plaintext);
}

#[test]
fn test_api_version_display() {
    assert_eq!(ApiVersion::V1.to_string(), "v1");
    assert_eq!(ApiVersion::V2.to_string(), "v2");
}
