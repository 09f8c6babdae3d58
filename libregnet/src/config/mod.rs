//! Service configuration.
//!
//! This module holds the startup options of a registry service with sensible
//! defaults, loading from a YAML file merged over the defaults. The options
//! seed the [`SecurityConfig`](crate::security::SecurityConfig); later changes
//! go through its load operations.

use crate::error::{Result, RegnetError};
use config::{Config as ConfigRs, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;


/// Namespace of the default public registry, as users type it.
pub const DEFAULT_NAMESPACE: &str = "docker.io";

/// Hostname of the default public index.
pub const INDEX_HOSTNAME: &str = "index.docker.io";

/// Address of the default index server used for login.
pub const INDEX_SERVER: &str = "https://index.docker.io/v1/";

/// V2 API endpoint of the default public registry.
pub const DEFAULT_V2_REGISTRY: &str = "https://registry-1.docker.io";

/// V1 API endpoint of the default public registry.
pub const DEFAULT_V1_REGISTRY: &str = "https://index.docker.io";

/// Default cap on the number of search results per index.
pub const DEFAULT_SEARCH_LIMIT: usize = 25;

/// Root configuration structure.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub registry: RegistryOptions,
}

impl Config {
    /// Parses a `Config` from a YAML string.
    ///
    /// This function is primarily used for testing.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let builder = ConfigRs::builder()
            .add_source(Self::defaults()?)
            .add_source(File::from_str(s, FileFormat::Yaml));

        Self::from_builder(builder)
    }

    /// Loads a `Config` from an optional file path.
    ///
    /// If the path is `None`, the defaults are returned.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigRs::builder().add_source(Self::defaults()?);

        if let Some(p) = path {
            builder = builder.add_source(File::from(p).required(true));
        }

        Self::from_builder(builder)
    }

    fn defaults() -> Result<ConfigRs> {
        ConfigRs::try_from(&Config::default()).map_err(|e| {
            RegnetError::config_with_source("Failed to build default configuration", None, e)
        })
    }

    /// Creates a `Config` from a `config::ConfigBuilder`.
    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        builder
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| {
                RegnetError::config_with_source(
                    "Failed to deserialize configuration",
                    None,
                    e,
                )
            })
    }
}

/// Network settings.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Network {
    /// Per-request deadline in seconds.
    #[serde(default = "default_network_timeout")]
    pub timeout: u64,

    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            timeout: default_network_timeout(),
            max_idle_per_host: default_max_idle_per_host(),
        }
    }
}

fn default_network_timeout() -> u64 {
    30
}

fn default_max_idle_per_host() -> usize {
    10
}

/// Registry trust and search settings.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct RegistryOptions {
    /// Login target when credentials carry no server address.
    #[serde(default = "default_index_server")]
    pub index_server: String,

    /// Hostnames treated as the default public registry.
    #[serde(default = "default_registries")]
    pub default_registries: Vec<String>,

    /// Registries queried, in priority order, by unqualified searches.
    #[serde(default = "default_search_registries")]
    pub search_registries: Vec<String>,

    /// CIDRs or `host[:port]` entries reached without TLS verification.
    #[serde(default)]
    pub insecure_registries: Vec<String>,

    /// Pull-only mirror URLs.
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// CIDRs or `host[:port]` entries allowed to serve nondistributable layers.
    #[serde(default)]
    pub allow_nondistributable_artifacts: Vec<String>,

    /// Explicit per-index trust overrides.
    #[serde(default)]
    pub indexes: Vec<IndexEntry>,

    #[serde(default)]
    pub v2_only: bool,

    /// Treat loopback and private addresses as insecure without configuration.
    #[serde(default = "default_local_addresses_insecure")]
    pub local_addresses_insecure: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            index_server: default_index_server(),
            default_registries: default_registries(),
            search_registries: default_search_registries(),
            insecure_registries: Vec::new(),
            mirrors: Vec::new(),
            allow_nondistributable_artifacts: Vec::new(),
            indexes: Vec::new(),
            v2_only: false,
            local_addresses_insecure: default_local_addresses_insecure(),
        }
    }
}

fn default_index_server() -> String {
    INDEX_SERVER.to_string()
}

fn default_registries() -> Vec<String> {
    vec![DEFAULT_NAMESPACE.to_string(), INDEX_HOSTNAME.to_string()]
}

fn default_search_registries() -> Vec<String> {
    vec![DEFAULT_NAMESPACE.to_string()]
}

fn default_local_addresses_insecure() -> bool {
    true
}

/// Trust override for a single index.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct IndexEntry {
    pub name: String,

    #[serde(default)]
    pub insecure: bool,
}
