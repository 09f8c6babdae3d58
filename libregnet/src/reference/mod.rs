//! Image reference parsing and normalization.
//!
//! Raw names follow the `[domain/]path[:tag|@digest]` grammar. The leading
//! segment is only treated as a domain when it looks like a hostname (it
//! contains `.` or `:`, or is `localhost`); no DNS lookup is ever made.
//! Single-segment names under the default registry land in the reserved
//! `library/` namespace, so `ubuntu` parses to `library/ubuntu`.
//!
//! Final character-class and length validation is delegated to the
//! `oci_spec::distribution::Reference` grammar.

use crate::config::{DEFAULT_NAMESPACE, INDEX_HOSTNAME};
use crate::error::{Result, RegnetError};
use oci_spec::distribution::Reference as OciReference;
use std::fmt;
use std::str::FromStr;


/// Reserved namespace of official repositories.
pub const LIBRARY_PREFIX: &str = "library/";

const DEFAULT_REGISTRIES: [&str; 2] = [DEFAULT_NAMESPACE, INDEX_HOSTNAME];

/// A parsed image reference.
///
/// `domain` is empty when the raw name carried none, which implies the
/// default registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl FromStr for Reference {
    type Err = RegnetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl Reference {
    /// Parses a raw name using the built-in default registry names.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::reference::Reference;
    ///
    /// let reference = Reference::parse("ubuntu:22.04").unwrap();
    /// assert_eq!(reference.domain(), "");
    /// assert_eq!(reference.path(), "library/ubuntu");
    /// assert_eq!(reference.tag(), Some("22.04"));
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_with(raw, &DEFAULT_REGISTRIES)
    }

    /// Parses a raw name, treating `default_registries` as aliases of the
    /// default registry for the `library/` elision rule.
    pub fn parse_with<S: AsRef<str>>(raw: &str, default_registries: &[S]) -> Result<Self> {
        if is_identifier(raw) {
            return Err(RegnetError::invalid_format(format!(
                "invalid repository name ({}), cannot specify 64-byte hexadecimal strings",
                raw
            )));
        }

        if raw.is_empty() {
            return Err(RegnetError::invalid_format("reference cannot be empty"));
        }

        if strip_tag(raw).is_empty() {
            return Err(RegnetError::NotNamed {
                reference: raw.to_string(),
            });
        }

        let (domain, remainder) = split_docker_domain(raw, default_registries);

        let remote_name = remainder.split_once(':').map_or(remainder.as_str(), |(n, _)| n);
        if remote_name.to_lowercase() != remote_name {
            return Err(RegnetError::invalid_format(
                "repository name must be lowercase",
            ));
        }

        let full = if domain.is_empty() {
            remainder.clone()
        } else {
            format!("{}/{}", domain, remainder)
        };
        validate_grammar(&full)?;

        let (name, digest) = match remainder.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (remainder.as_str(), None),
        };
        let (path, tag) = match name.rsplit_once(':') {
            Some((path, tag)) => (path, Some(tag.to_string())),
            None => (name, None),
        };

        Ok(Self {
            domain: domain.to_string(),
            path: path.to_string(),
            tag,
            digest,
        })
    }

    /// Returns the domain, or an empty string for the implied default registry.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the repository path (without domain).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the tag part of the reference, if present.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Returns the digest part of the reference, if present.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Returns the full repository name, `domain/path` or just `path`.
    pub fn name(&self) -> String {
        if self.domain.is_empty() {
            self.path.clone()
        } else {
            format!("{}/{}", self.domain, self.path)
        }
    }

    /// Returns the shortest string a user could type for this reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::reference::Reference;
    ///
    /// let reference = Reference::parse("docker.io/library/alpine:3.19").unwrap();
    /// assert_eq!(reference.familiar_string(), "alpine:3.19");
    /// ```
    pub fn familiar_string(&self) -> String {
        self.familiar_string_with(&DEFAULT_REGISTRIES)
    }

    /// Like [`familiar_string`](Self::familiar_string), treating
    /// `default_registries` as the default registry names.
    pub fn familiar_string_with<S: AsRef<str>>(&self, default_registries: &[S]) -> String {
        familiarize(&self.domain, &self.to_string(), default_registries)
    }

    /// Returns the shortest repository name a user could type.
    pub fn familiar_name(&self) -> String {
        self.familiar_name_with(&DEFAULT_REGISTRIES)
    }

    pub fn familiar_name_with<S: AsRef<str>>(&self, default_registries: &[S]) -> String {
        familiarize(&self.domain, &self.name(), default_registries)
    }

    /// Builds a reference with the full name replaced by `name`.
    ///
    /// The tag is carried over when present, otherwise the digest.
    pub fn substitute_name(&self, name: &str) -> Result<Self> {
        validate_name(name)?;

        let (domain, path) = match split_hostname(name) {
            Some((domain, path)) => (domain, path),
            None => ("", name),
        };
        if path.to_lowercase() != path {
            return Err(RegnetError::invalid_format(
                "repository name must be lowercase",
            ));
        }

        let (tag, digest) = if self.tag.is_some() {
            (self.tag.clone(), None)
        } else if self.digest.is_some() {
            (None, self.digest.clone())
        } else {
            (None, None)
        };

        Ok(Self {
            domain: domain.to_string(),
            path: path.to_string(),
            tag,
            digest,
        })
    }

    /// Splits the reference into its index hostname and the remote part.
    ///
    /// The index is empty when the reference carries no valid index
    /// hostname, which means the default registry.
    pub fn split_index_and_remote(&self) -> (String, Reference) {
        if is_valid_hostname(&self.domain) {
            let remote = Self {
                domain: String::new(),
                ..self.clone()
            };
            (self.domain.clone(), remote)
        } else {
            (String::new(), self.clone())
        }
    }

    /// Returns true when the reference names its index explicitly.
    pub fn is_fully_qualified(&self) -> bool {
        !self.split_index_and_remote().0.is_empty()
    }

    /// Prefixes the reference with `index` unless it already has one.
    ///
    /// # Examples
    ///
    /// ```
    /// use libregnet::reference::Reference;
    ///
    /// let reference = Reference::parse("busybox").unwrap();
    /// let qualified = reference.qualify("registry.example.com").unwrap();
    /// assert_eq!(qualified.name(), "registry.example.com/library/busybox");
    /// assert_eq!(qualified.qualify("other.example.com").unwrap(), qualified);
    /// ```
    pub fn qualify(&self, index: &str) -> Result<Self> {
        if !is_valid_hostname(index) {
            return Err(RegnetError::invalid_hostname(index));
        }

        let (current, remote) = self.split_index_and_remote();
        if current.is_empty() {
            self.substitute_name(&format!("{}/{}", index, remote.path))
        } else {
            Ok(self.clone())
        }
    }

    /// Drops the index hostname, keeping path, tag and digest.
    pub fn unqualify(&self) -> Self {
        self.split_index_and_remote().1
    }
}

/// Returns true when `hostname` can identify an index.
pub fn is_valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty() && !hostname.contains('/') && looks_like_domain(hostname)
}

/// Strips a default registry (and its `library/` namespace) from a
/// fully-qualified familiar string.
///
/// `domain/library/` is stripped whole when present, otherwise only
/// `domain/`, so other namespaces under the default registry are kept.
///
/// # Examples
///
/// ```
/// use libregnet::reference::trim_default_registry;
///
/// let defaults = ["docker.io"];
/// assert_eq!(trim_default_registry("docker.io/library/redis:7", &defaults), "redis:7");
/// assert_eq!(trim_default_registry("docker.io/bitnami/redis", &defaults), "bitnami/redis");
/// assert_eq!(trim_default_registry("quay.io/coreos/etcd", &defaults), "quay.io/coreos/etcd");
/// ```
pub fn trim_default_registry<S: AsRef<str>>(s: &str, default_registries: &[S]) -> String {
    let Some((domain, rest)) = split_hostname(s) else {
        return s.to_string();
    };

    if !default_registries.iter().any(|r| r.as_ref() == domain) {
        return s.to_string();
    }

    rest.strip_prefix(LIBRARY_PREFIX).unwrap_or(rest).to_string()
}

/// Splits a leading hostname segment off `name`, if there is one.
pub(crate) fn split_hostname(name: &str) -> Option<(&str, &str)> {
    match name.split_once('/') {
        Some((head, tail)) if looks_like_domain(head) => Some((head, tail)),
        _ => None,
    }
}

fn looks_like_domain(segment: &str) -> bool {
    segment.contains(['.', ':']) || segment == "localhost"
}

fn split_docker_domain<S: AsRef<str>>(name: &str, default_registries: &[S]) -> (String, String) {
    let (domain, remainder) = split_hostname(name).unwrap_or(("", name));

    let is_default = domain.is_empty() || default_registries.iter().any(|r| r.as_ref() == domain);
    if is_default && !remainder.contains('/') {
        return (domain.to_string(), format!("{}{}", LIBRARY_PREFIX, remainder));
    }

    (domain.to_string(), remainder.to_string())
}

fn familiarize<S: AsRef<str>>(domain: &str, s: &str, default_registries: &[S]) -> String {
    if domain.is_empty() {
        s.strip_prefix(LIBRARY_PREFIX).unwrap_or(s).to_string()
    } else {
        trim_default_registry(s, default_registries)
    }
}

/// Drops a trailing `:tag` (and anything after `@`) from a name.
fn strip_tag(name: &str) -> &str {
    let name = name.split_once('@').map_or(name, |(n, _)| n);
    match name.rfind(':') {
        Some(i) if !name[i..].contains('/') => &name[..i],
        _ => name,
    }
}

/// A bare 64-character lowercase hex string is ambiguous with an image ID.
fn is_identifier(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn validate_grammar(reference: &str) -> Result<()> {
    OciReference::from_str(reference)
        .map(|_| ())
        .map_err(|e| RegnetError::invalid_format_with_source(format!("{}: {}", reference, e), e))
}

fn validate_name(name: &str) -> Result<()> {
    if name.contains('@') || strip_tag(name) != name {
        return Err(RegnetError::invalid_format(format!(
            "{} is not a bare repository name",
            name
        )));
    }
    validate_grammar(name)
}
