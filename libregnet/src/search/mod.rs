//! Federated repository search.
//!
//! A search term either names its index (`reg.example.com/app`) and is
//! sent to that index alone, or it is unqualified and fans out to every
//! configured query registry concurrently. Partial failures are tolerated:
//! the call succeeds when at least one index answered.
//!
//! Results are ranked deterministically and, when the caller does not care
//! which index a result came from, collapsed so each `(registry, name)`
//! pair appears once.

use crate::auth::AuthConfig;
use crate::config::{DEFAULT_NAMESPACE, DEFAULT_SEARCH_LIMIT};
use crate::endpoint::{ApiEndpoint, EndpointResolver};
use crate::error::{AttemptError, Result, RegnetError};
use crate::reference::{LIBRARY_PREFIX, split_hostname};
use crate::transport::{RegistryTransport, RemoteResult, SearchSession};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};


/// One repository found by a search, attributed to the index that returned it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    /// Index the result was found in.
    pub index_name: String,
    /// Registry hosting the repository. Usually the index itself, unless the
    /// index returned a name qualified with another registry.
    pub registry_name: String,
    pub name: String,
    pub description: String,
    pub star_count: u64,
    pub is_official: bool,
    pub is_automated: bool,
}

impl SearchResult {
    fn from_remote(index_name: &str, remote: RemoteResult) -> Self {
        let (registry_name, name) = match split_repos_search_term(&remote.name, false) {
            (registry, name) if !registry.is_empty() => (registry, name),
            _ => (index_name.to_string(), remote.name),
        };

        Self {
            index_name: index_name.to_string(),
            registry_name,
            name,
            description: remote.description,
            star_count: remote.star_count,
            is_official: remote.is_official,
            is_automated: remote.is_automated,
        }
    }
}

/// Splits a search term into its index name and remote name.
///
/// The index is empty for an unqualified term, or the default namespace
/// when `fix_missing_index` is set.
///
/// # Examples
///
/// ```
/// use libregnet::search::split_repos_search_term;
///
/// assert_eq!(
///     split_repos_search_term("quay.io/coreos/etcd", false),
///     ("quay.io".to_string(), "coreos/etcd".to_string())
/// );
/// assert_eq!(
///     split_repos_search_term("bitnami/redis", true),
///     ("docker.io".to_string(), "bitnami/redis".to_string())
/// );
/// ```
pub fn split_repos_search_term(term: &str, fix_missing_index: bool) -> (String, String) {
    match split_hostname(term) {
        Some((index, remote)) => (index.to_string(), remote.to_string()),
        None if fix_missing_index => (DEFAULT_NAMESPACE.to_string(), term.to_string()),
        None => (String::new(), term.to_string()),
    }
}

/// Returns true when `term` names its index explicitly.
pub fn is_search_term_fully_qualified(term: &str) -> bool {
    !split_repos_search_term(term, false).0.is_empty()
}

/// Orders results for display.
///
/// With the index significant: index, stars (descending), registry, name,
/// description. Without it the index is dropped from the key entirely:
/// registry, stars (descending), name, description.
pub fn sort_results(results: &mut [SearchResult], no_index: bool) {
    results.sort_by(|a, b| compare_results(a, b, no_index));
}

fn compare_results(a: &SearchResult, b: &SearchResult, no_index: bool) -> Ordering {
    let stars = b.star_count.cmp(&a.star_count);
    let tail = a
        .name
        .cmp(&b.name)
        .then_with(|| a.description.cmp(&b.description));

    if no_index {
        a.registry_name
            .cmp(&b.registry_name)
            .then(stars)
            .then(tail)
    } else {
        a.index_name
            .cmp(&b.index_name)
            .then(stars)
            .then_with(|| a.registry_name.cmp(&b.registry_name))
            .then(tail)
    }
}

/// Collapses consecutive results sharing `(registry_name, name)`.
///
/// Of two colliding entries the one whose index comes first in `priority`
/// is kept; indexes missing from `priority` rank last. Remaining ties go to
/// the higher star count.
pub fn remove_search_duplicates<S: AsRef<str>>(
    results: Vec<SearchResult>,
    priority: &[S],
) -> Vec<SearchResult> {
    let rank = |index: &str| {
        priority
            .iter()
            .position(|p| p.as_ref() == index)
            .unwrap_or(priority.len())
    };

    let mut deduped: Vec<SearchResult> = Vec::with_capacity(results.len());
    for current in results {
        match deduped.last_mut() {
            Some(previous)
                if previous.registry_name == current.registry_name
                    && previous.name == current.name =>
            {
                let (prev_rank, curr_rank) = (rank(&previous.index_name), rank(&current.index_name));
                if prev_rank > curr_rank
                    || (prev_rank == curr_rank && previous.star_count < current.star_count)
                {
                    *previous = current;
                }
            }
            _ => deduped.push(current),
        }
    }
    deduped
}

/// Caps the caller's limit at the default.
fn effective_limit(limit: Option<usize>) -> usize {
    match limit {
        Some(n) if n > 0 && n < DEFAULT_SEARCH_LIMIT => n,
        _ => DEFAULT_SEARCH_LIMIT,
    }
}

fn validate_no_scheme(term: &str) -> Result<()> {
    if term.contains("://") {
        return Err(RegnetError::invalid_format(format!(
            "invalid repository name {}: repository name should not contain a scheme",
            term
        )));
    }
    Ok(())
}

/// Runs searches against one or more indexes.
#[derive(Clone)]
pub struct Searcher {
    resolver: EndpointResolver,
    transport: Arc<dyn RegistryTransport>,
    query_registries: Arc<[String]>,
}

impl Searcher {
    /// Creates a searcher fanning unqualified terms out to `query_registries`,
    /// in priority order.
    pub fn new<S: AsRef<str>>(
        resolver: EndpointResolver,
        transport: Arc<dyn RegistryTransport>,
        query_registries: &[S],
    ) -> Self {
        Self {
            resolver,
            transport,
            query_registries: query_registries.iter().map(|r| r.as_ref().to_string()).collect(),
        }
    }

    pub fn query_registries(&self) -> &[String] {
        &self.query_registries
    }

    /// Searches for `term`.
    ///
    /// # Errors
    ///
    /// - `NoConfiguredRepository` for an unqualified term with no query registries
    /// - the error of a qualified search
    /// - the last error when every fanned-out search failed
    pub async fn search(
        &self,
        term: &str,
        limit: Option<usize>,
        auth: Option<&AuthConfig>,
        no_index: bool,
    ) -> Result<Vec<SearchResult>> {
        let limit = effective_limit(limit);

        let mut results = if is_search_term_fully_qualified(term) {
            self.search_term(term, limit, auth).await?
        } else if self.query_registries.is_empty() {
            return Err(RegnetError::NoConfiguredRepository);
        } else {
            self.fan_out(term, limit, auth).await?
        };

        sort_results(&mut results, no_index);
        if no_index {
            results = remove_search_duplicates(results, &*self.query_registries);
        }
        Ok(results)
    }

    async fn fan_out(
        &self,
        term: &str,
        limit: usize,
        auth: Option<&AuthConfig>,
    ) -> Result<Vec<SearchResult>> {
        let mut tasks = JoinSet::new();
        for registry in self.query_registries.iter() {
            let searcher = self.clone();
            let term = format!("{}/{}", registry, term);
            let auth = auth.cloned();
            tasks.spawn(async move {
                let outcome = searcher.search_term(&term, limit, auth.as_ref()).await;
                (term, outcome)
            });
        }

        let mut results = Vec::new();
        let mut succeeded = false;
        let mut last_error = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(found))) => {
                    succeeded = true;
                    results.extend(found);
                }
                Ok((term, Err(err))) => {
                    error!(term = %term, error = %err, "search failed");
                    last_error = Some(err);
                }
                Err(err) => {
                    error!(error = %err, "search task did not complete");
                    last_error = Some(RegnetError::network_with_source(
                        "search task did not complete",
                        err,
                    ));
                }
            }
        }

        if !succeeded {
            return Err(last_error.unwrap_or(RegnetError::NoConfiguredRepository));
        }
        Ok(results)
    }

    /// Searches a single index named by the prefix of `term`.
    async fn search_term(
        &self,
        term: &str,
        limit: usize,
        auth: Option<&AuthConfig>,
    ) -> Result<Vec<SearchResult>> {
        validate_no_scheme(term)?;

        let (index_name, remote_name) = split_repos_search_term(term, true);
        let (index, endpoints) = self
            .resolver
            .run_blocking(move |resolver| {
                let index = resolver.security().index_info(&index_name)?;
                let endpoints = resolver.search_endpoints(&index)?;
                Ok((index, endpoints))
            })
            .await?;
        let session = self.open_session(&endpoints, auth).await?;

        let query = if index.official {
            remote_name.strip_prefix(LIBRARY_PREFIX).unwrap_or(&remote_name)
        } else {
            remote_name.as_str()
        };

        debug!(index = %index.name, query, limit, "searching index");
        let found = session.search_repositories(query, limit).await?;

        Ok(found
            .results
            .into_iter()
            .map(|remote| SearchResult::from_remote(&index.name, remote))
            .collect())
    }

    /// Opens a session on the first endpoint that accepts one.
    ///
    /// Credentials carrying an identity token first try a V2 token
    /// session; when the index does not support it the plain V1 session
    /// is used instead.
    async fn open_session(
        &self,
        endpoints: &[ApiEndpoint],
        auth: Option<&AuthConfig>,
    ) -> Result<Box<dyn SearchSession>> {
        let mut last_error = None;

        for endpoint in endpoints {
            if let Some(auth) = auth.filter(|a| a.has_identity_token() && !a.username.is_empty()) {
                match self.transport.identity_token_session(endpoint, auth).await {
                    Ok(session) => return Ok(session),
                    Err(AttemptError::Fallback(err)) => {
                        error!(
                            url = %endpoint.url,
                            error = %err,
                            "cannot use identity token for search, v2 auth not supported"
                        );
                    }
                    Err(AttemptError::Fatal(err)) => return Err(err),
                }
            }

            match self.transport.v1_session(endpoint, auth).await {
                Ok(session) => return Ok(session),
                Err(AttemptError::Fallback(err)) => {
                    debug!(url = %endpoint.url, error = %err, "search endpoint unavailable, trying next");
                    last_error = Some(err);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
            }
        }

        Err(last_error.unwrap_or(RegnetError::NoConfiguredRegistry))
    }
}
