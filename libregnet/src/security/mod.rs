//! Registry trust configuration.
//!
//! [`SecurityConfig`] is the one piece of shared mutable state in the crate.
//! It records which registries are reached without TLS verification, which
//! may serve nondistributable layers, and which mirrors stand in for the
//! default registry on pulls.
//!
//! Readers take an immutable snapshot of the current state; the load
//! operations validate their whole input first and then swap in a fully
//! built replacement under the lock, so no reader ever observes a partial
//! update and a rejected load leaves the previous state in place.

use crate::config::{DEFAULT_NAMESPACE, RegistryOptions};
use crate::error::{Result, RegnetError};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
mod tests;

/// An IP network in CIDR notation, e.g. `10.0.0.0/8` or `fd00::/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Returns true when `ip` lies inside this network.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask(self.prefix, 32) as u32;
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask(self.prefix, 128);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask(prefix: u8, bits: u32) -> u128 {
    if prefix == 0 {
        0
    } else {
        (u128::MAX << (bits - u32::from(prefix))) & (u128::MAX >> (128 - bits))
    }
}

impl FromStr for Cidr {
    type Err = RegnetError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| RegnetError::invalid_config_entry(s, "missing prefix length"))?;
        let addr = IpAddr::from_str(addr)
            .map_err(|_| RegnetError::invalid_config_entry(s, "invalid network address"))?;
        let prefix = u8::from_str(prefix)
            .map_err(|_| RegnetError::invalid_config_entry(s, "invalid prefix length"))?;

        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(RegnetError::invalid_config_entry(s, "prefix length out of range"));
        }

        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Resolves hostnames to addresses for CIDR matching.
pub trait HostResolver: Send + Sync {
    /// Returns the addresses of `host`; an empty list when it cannot be resolved.
    fn resolve(&self, host: &str) -> Vec<IpAddr>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str) -> Vec<IpAddr> {
        match (host, 0).to_socket_addrs() {
            Ok(addrs) => addrs.map(|a| a.ip()).collect(),
            Err(e) => {
                debug!(host, error = %e, "host lookup failed");
                Vec::new()
            }
        }
    }
}

/// How TLS is negotiated with an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsPolicy {
    /// Platform default verification.
    Strict,
    /// TLS without certificate verification, only for hosts classified insecure.
    SkipVerify,
    /// Plain HTTP.
    Plaintext,
}

/// Trust classification of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub secure: bool,
    pub official: bool,
}

impl Classification {
    /// TLS policy for an `https` endpoint on this host.
    pub fn tls_policy(&self) -> TlsPolicy {
        if self.secure {
            TlsPolicy::Strict
        } else {
            TlsPolicy::SkipVerify
        }
    }
}

/// An index (registry metadata authority) as seen by one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub secure: bool,
    pub official: bool,
}

/// One consistent view of the trust configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub insecure_registry_cidrs: Vec<Cidr>,
    pub insecure_hostnames: BTreeSet<String>,
    pub nondistributable_cidrs: Vec<Cidr>,
    pub nondistributable_hostnames: BTreeSet<String>,
    pub mirrors: Vec<Url>,
    /// Hostname to explicit `secure` flag.
    pub index_overrides: HashMap<String, bool>,
    pub default_registries: Vec<String>,
    pub v2_only: bool,
    pub local_addresses_insecure: bool,
}

impl ServiceConfig {
    /// Returns true when `hostname` names the default public registry.
    pub fn is_official(&self, hostname: &str) -> bool {
        self.default_registries.iter().any(|r| r == hostname)
    }

    /// Classifies `hostname` (`host[:port]`) against this configuration.
    pub fn classify(&self, hostname: &str, resolver: &dyn HostResolver) -> Classification {
        if self.is_official(hostname) {
            return Classification {
                secure: true,
                official: true,
            };
        }

        let insecure = Classification {
            secure: false,
            official: false,
        };

        if let Some(secure) = self.index_overrides.get(hostname) {
            return Classification {
                secure: *secure,
                official: false,
            };
        }

        if self.insecure_hostnames.contains(hostname) {
            return insecure;
        }

        for ip in host_addresses(hostname, resolver) {
            if self.local_addresses_insecure && is_local_address(&ip) {
                debug!(hostname, %ip, "local address, treating registry as insecure");
                return insecure;
            }
            if self.insecure_registry_cidrs.iter().any(|c| c.contains(&ip)) {
                return insecure;
            }
        }

        Classification {
            secure: true,
            official: false,
        }
    }

    /// Returns true when `hostname` may serve nondistributable artifacts.
    pub fn allow_nondistributable_artifacts(
        &self,
        hostname: &str,
        resolver: &dyn HostResolver,
    ) -> bool {
        if self.nondistributable_hostnames.contains(hostname) {
            return true;
        }
        if self.nondistributable_cidrs.is_empty() {
            return false;
        }
        host_addresses(hostname, resolver)
            .iter()
            .any(|ip| self.nondistributable_cidrs.iter().any(|c| c.contains(ip)))
    }
}

/// Lock-guarded trust configuration shared by resolver, authenticator and
/// searcher.
pub struct SecurityConfig {
    state: Mutex<Arc<ServiceConfig>>,
    resolver: Arc<dyn HostResolver>,
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl SecurityConfig {
    /// Builds the configuration from startup options, resolving hosts
    /// through the operating system.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::config::RegistryOptions;
    /// use libregnet::security::SecurityConfig;
    ///
    /// let security = SecurityConfig::new(&RegistryOptions::default()).unwrap();
    /// assert!(security.classify("docker.io").official);
    /// ```
    pub fn new(options: &RegistryOptions) -> Result<Self> {
        Self::with_resolver(options, Arc::new(SystemResolver))
    }

    /// Builds the configuration with a custom host resolver.
    pub fn with_resolver(
        options: &RegistryOptions,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self> {
        let (insecure_registry_cidrs, insecure_hostnames) =
            parse_host_entries(&options.insecure_registries)?;
        let (nondistributable_cidrs, nondistributable_hostnames) =
            parse_host_entries(&options.allow_nondistributable_artifacts)?;
        let mirrors = parse_mirrors(&options.mirrors)?;

        let mut index_overrides = HashMap::new();
        for entry in &options.indexes {
            validate_host_port(&entry.name)?;
            index_overrides.insert(entry.name.clone(), !entry.insecure);
        }

        let state = ServiceConfig {
            insecure_registry_cidrs,
            insecure_hostnames,
            nondistributable_cidrs,
            nondistributable_hostnames,
            mirrors,
            index_overrides,
            default_registries: options.default_registries.clone(),
            v2_only: options.v2_only,
            local_addresses_insecure: options.local_addresses_insecure,
        };

        Ok(Self {
            state: Mutex::new(Arc::new(state)),
            resolver,
        })
    }

    /// Returns the current configuration.
    ///
    /// The snapshot stays valid (and unchanged) across later loads.
    pub fn snapshot(&self) -> Arc<ServiceConfig> {
        Arc::clone(&self.state.lock())
    }

    /// Returns the resolver used for CIDR matching.
    pub fn resolver(&self) -> &dyn HostResolver {
        self.resolver.as_ref()
    }

    /// Replaces the insecure registry CIDRs and hostnames.
    pub fn load_insecure_registries<S: AsRef<str>>(&self, registries: &[S]) -> Result<()> {
        let (cidrs, hostnames) = parse_host_entries(registries)?;
        self.update(|config| {
            config.insecure_registry_cidrs = cidrs;
            config.insecure_hostnames = hostnames;
        });
        Ok(())
    }

    /// Replaces the registry mirrors.
    pub fn load_mirrors<S: AsRef<str>>(&self, mirrors: &[S]) -> Result<()> {
        let mirrors = parse_mirrors(mirrors)?;
        self.update(|config| config.mirrors = mirrors);
        Ok(())
    }

    /// Replaces the hosts allowed to serve nondistributable artifacts.
    pub fn load_allow_nondistributable_artifacts<S: AsRef<str>>(
        &self,
        registries: &[S],
    ) -> Result<()> {
        let (cidrs, hostnames) = parse_host_entries(registries)?;
        self.update(|config| {
            config.nondistributable_cidrs = cidrs;
            config.nondistributable_hostnames = hostnames;
        });
        Ok(())
    }

    /// Classifies `hostname` against the current configuration.
    pub fn classify(&self, hostname: &str) -> Classification {
        self.snapshot().classify(hostname, self.resolver())
    }

    /// Returns the TLS policy for `https` connections to `hostname`.
    pub fn tls_policy(&self, hostname: &str) -> TlsPolicy {
        self.classify(hostname).tls_policy()
    }

    /// Returns true when `hostname` may serve nondistributable artifacts.
    pub fn allow_nondistributable_artifacts(&self, hostname: &str) -> bool {
        self.snapshot()
            .allow_nondistributable_artifacts(hostname, self.resolver())
    }

    /// Builds the [`IndexInfo`] for an index name.
    ///
    /// Aliases of the default registry are normalized to its namespace.
    pub fn index_info(&self, name: &str) -> Result<IndexInfo> {
        validate_host_port(name).map_err(|_| RegnetError::invalid_hostname(name))?;

        let snapshot = self.snapshot();
        let classification = snapshot.classify(name, self.resolver());
        let name = if classification.official {
            DEFAULT_NAMESPACE.to_string()
        } else {
            name.to_string()
        };

        Ok(IndexInfo {
            name,
            secure: classification.secure,
            official: classification.official,
        })
    }

    fn update<F: FnOnce(&mut ServiceConfig)>(&self, apply: F) {
        let mut state = self.state.lock();
        let mut next = ServiceConfig::clone(&state);
        apply(&mut next);
        *state = Arc::new(next);
    }
}

/// Splits entries into CIDRs and `host[:port]` names, failing on the first
/// malformed entry.
fn parse_host_entries<S: AsRef<str>>(entries: &[S]) -> Result<(Vec<Cidr>, BTreeSet<String>)> {
    let mut cidrs = Vec::new();
    let mut hostnames = BTreeSet::new();

    for entry in entries {
        let mut entry = entry.as_ref().trim();
        for scheme in ["http://", "https://"] {
            if let Some(stripped) = entry.strip_prefix(scheme) {
                warn!(entry, "registry entry should not carry a scheme, ignoring it");
                entry = stripped;
            }
        }

        if entry.contains('/') {
            cidrs.push(Cidr::from_str(entry)?);
        } else {
            validate_host_port(entry)?;
            hostnames.insert(entry.to_string());
        }
    }

    Ok((cidrs, hostnames))
}

fn parse_mirrors<S: AsRef<str>>(mirrors: &[S]) -> Result<Vec<Url>> {
    mirrors.iter().map(|m| validate_mirror(m.as_ref())).collect()
}

/// Validates a mirror URL: `http(s)://host[:port][/]`, nothing else.
pub fn validate_mirror(mirror: &str) -> Result<Url> {
    let url = Url::parse(mirror)
        .map_err(|_| RegnetError::invalid_config_entry(mirror, "not a valid URI"))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(RegnetError::invalid_config_entry(mirror, "unsupported scheme"));
    }
    if url.host_str().is_none() {
        return Err(RegnetError::invalid_config_entry(mirror, "missing host"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(RegnetError::invalid_config_entry(
            mirror,
            "path, query and fragment are not allowed",
        ));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(RegnetError::invalid_config_entry(mirror, "credentials are not allowed"));
    }

    Ok(url)
}

/// Validates a `hostname[:port]` entry.
pub fn validate_host_port(entry: &str) -> Result<()> {
    let invalid = |message: &str| RegnetError::invalid_config_entry(entry, message);

    if entry.is_empty() {
        return Err(invalid("empty hostname"));
    }
    if entry.parse::<Ipv6Addr>().is_ok() {
        return Ok(());
    }

    let (host, port) = if let Some(rest) = entry.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 address"))?;
        host.parse::<Ipv6Addr>()
            .map_err(|_| invalid("invalid IPv6 address"))?;
        match rest.strip_prefix(':') {
            Some(port) => (None, Some(port)),
            None if rest.is_empty() => (None, None),
            None => return Err(invalid("unexpected characters after IPv6 address")),
        }
    } else {
        match entry.split_once(':') {
            Some((host, port)) => (Some(host), Some(port)),
            None => (Some(entry), None),
        }
    };

    if let Some(port) = port {
        match port.parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => return Err(invalid("invalid port")),
        }
    }

    if let Some(host) = host {
        if host.is_empty() || host.len() > 253 {
            return Err(invalid("invalid hostname length"));
        }
        let valid_label = |label: &str| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        };
        if !host.split('.').all(valid_label) {
            return Err(invalid("invalid hostname"));
        }
    }

    Ok(())
}

/// Addresses of a `host[:port]` entry; IP literals are never looked up.
fn host_addresses(hostname: &str, resolver: &dyn HostResolver) -> Vec<IpAddr> {
    let host = strip_port(hostname);
    match host.parse::<IpAddr>() {
        Ok(ip) => vec![ip],
        Err(_) => resolver.resolve(host),
    }
}

fn strip_port(hostname: &str) -> &str {
    if let Some(rest) = hostname.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    if hostname.parse::<Ipv6Addr>().is_ok() {
        return hostname;
    }
    hostname.split_once(':').map_or(hostname, |(host, _)| host)
}

/// Loopback and private address families.
fn is_local_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}
