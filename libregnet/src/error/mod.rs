//! Error types for regnet
//!
//! This module provides the error taxonomy shared by reference parsing,
//! security configuration, endpoint resolution, login and search.
//! All errors implement the standard Error trait and provide context-rich
//! error messages.

use thiserror::Error;


/// Main error type for regnet operations
#[derive(Error, Debug)]
pub enum RegnetError {
    /// Malformed reference string
    #[error("invalid reference format: {message}")]
    InvalidFormat {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Syntactically valid reference without a name component
    #[error("reference {reference} has no name")]
    NotNamed { reference: String },

    /// Hostname that cannot identify an index
    #[error("invalid hostname {hostname:?}")]
    InvalidHostname { hostname: String },

    /// Malformed CIDR, hostname or URL handed to a load operation
    #[error("invalid registry configuration entry {entry:?}: {message}")]
    InvalidConfigEntry { entry: String, message: String },

    /// No server address could be determined for login
    #[error("no configured registry to authenticate to")]
    NoConfiguredRegistry,

    /// Unqualified search with an empty query registry list
    #[error("no configured repository to search")]
    NoConfiguredRepository,

    /// Network-related errors (connection, timeout, DNS)
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication errors (401, 403, token issues)
    #[error("Authentication error (status: {status_code:?}): {message}")]
    Authentication {
        message: String,
        status_code: Option<u16>,
    },

    /// Resource not found errors (404)
    #[error("{resource_type} not found: {name}")]
    NotFound { resource_type: String, name: String },

    /// Rate limiting errors (429)
    #[error("Rate limit: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },

    /// Server errors (500, 503)
    #[error("Server error (status: {status_code}): {message}")]
    Server { message: String, status_code: u16 },

    /// Validation errors (unexpected payloads, bad headers)
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors (invalid config file, missing settings)
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for regnet operations
pub type Result<T> = std::result::Result<T, RegnetError>;

impl RegnetError {
    /// Creates a new invalid format error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::error::RegnetError;
    ///
    /// let err = RegnetError::invalid_format("repository name must be lowercase");
    /// assert!(matches!(err, RegnetError::InvalidFormat { .. }));
    /// ```
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        Self::InvalidFormat {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new invalid format error with a source error.
    pub fn invalid_format_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::InvalidFormat {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new invalid hostname error.
    pub fn invalid_hostname<S: Into<String>>(hostname: S) -> Self {
        Self::InvalidHostname {
            hostname: hostname.into(),
        }
    }

    /// Creates a new invalid configuration entry error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::error::RegnetError;
    ///
    /// let err = RegnetError::invalid_config_entry("10.0.0.0/33", "prefix length out of range");
    /// assert!(err.to_string().contains("10.0.0.0/33"));
    /// ```
    pub fn invalid_config_entry<S: Into<String>, M: Into<String>>(entry: S, message: M) -> Self {
        Self::InvalidConfigEntry {
            entry: entry.into(),
            message: message.into(),
        }
    }

    /// Creates a new network error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::error::RegnetError;
    ///
    /// let err = RegnetError::network("connection refused");
    /// assert!(matches!(err, RegnetError::Network { .. }));
    /// ```
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new network error with a source error.
    pub fn network_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new authentication error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::error::RegnetError;
    ///
    /// let err = RegnetError::authentication("invalid credentials", Some(401));
    /// assert!(matches!(err, RegnetError::Authentication { .. }));
    /// ```
    pub fn authentication<S: Into<String>>(message: S, status_code: Option<u16>) -> Self {
        Self::Authentication {
            message: message.into(),
            status_code,
        }
    }

    /// Creates a new not found error.
    pub fn not_found<S: Into<String>>(resource_type: S, name: S) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Creates a new rate limit error.
    pub fn rate_limit<S: Into<String>>(message: S, retry_after: Option<u64>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a new server error.
    pub fn server<S: Into<String>>(message: S, status_code: u16) -> Self {
        Self::Server {
            message: message.into(),
            status_code,
        }
    }

    /// Creates a new validation error.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new validation error with a source error.
    pub fn validation_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Validation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new configuration error with a source error.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::error::RegnetError;
    /// use std::io;
    ///
    /// let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
    /// let err = RegnetError::config_with_source("failed to read config", Some("/etc/regnet.yaml"), io_err);
    /// assert!(matches!(err, RegnetError::Config { .. }));
    /// ```
    pub fn config_with_source<S, E>(message: S, path: Option<S>, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            path: path.map(|p| p.into()),
            source: Some(Box::new(source)),
        }
    }
}

/// Outcome of a failed attempt against one endpoint candidate.
///
/// Loops over candidate endpoints inspect the variant explicitly:
/// `Fallback` moves on to the next candidate, `Fatal` aborts the loop.
#[derive(Error, Debug)]
pub enum AttemptError {
    /// The endpoint or protocol version rejected the handshake.
    #[error("{0}")]
    Fallback(RegnetError),

    /// Credential or server problem; not retried elsewhere.
    #[error("{0}")]
    Fatal(RegnetError),
}

impl AttemptError {
    /// Returns true for the "try next candidate" class.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    /// Unwraps the underlying error regardless of class.
    pub fn into_inner(self) -> RegnetError {
        match self {
            Self::Fallback(err) | Self::Fatal(err) => err,
        }
    }
}

impl From<RegnetError> for AttemptError {
    fn from(err: RegnetError) -> Self {
        Self::Fatal(err)
    }
}
