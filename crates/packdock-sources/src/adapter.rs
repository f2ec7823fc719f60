//! The binary source capability interface and its closed registry.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use packdock_core::config::BinarySourceConfig;

use crate::error::SourceError;
use crate::http::HttpBackend;
use crate::item::FetchResult;
use crate::json_index::JsonIndexSource;
use crate::listing::DirListingSource;
use crate::paged_api::PagedApiSource;

/// Timeout for metadata fetches (listings, indices).
pub(crate) const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for paginated archive APIs, which answer slowly under load.
pub(crate) const SLOW_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Capability interface of one binary mirror source.
///
/// A traversal is: `init_fetch` once, then `fetch` per directory (repeated
/// while it returns a `next_cursor`), then `finish_fetch` exactly once with
/// the overall outcome, regardless of partial failure.
#[async_trait]
pub trait BinarySource: Send + Sync {
    /// The configured source name this adapter serves.
    fn source_name(&self) -> &str;

    /// Prepare a traversal (fetch and cache an index, reset counters).
    async fn init_fetch(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// List one directory.
    ///
    /// Returns `None` when the source has nothing to say about `dir`;
    /// `Some` carries the items plus an optional continuation cursor for
    /// the same directory.
    async fn fetch(
        &self,
        dir: &str,
        cursor: Option<&serde_json::Value>,
    ) -> Result<Option<FetchResult>, SourceError>;

    /// Traversal cleanup; `success` reports whether the whole tree was
    /// walked without error.
    async fn finish_fetch(&self, _success: bool) -> Result<(), SourceError> {
        Ok(())
    }
}

/// The closed set of adapter kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Scrapes HTML directory-listing markup.
    DirListing,
    /// Reads a JSON version index (a registry manifest).
    JsonIndex,
    /// Walks a paginated API with a continuation token.
    PagedApi,
}

impl SourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DirListing => "dir_listing",
            Self::JsonIndex => "json_index",
            Self::PagedApi => "paged_api",
        }
    }
}

impl FromStr for SourceKind {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dir_listing" => Ok(Self::DirListing),
            "json_index" => Ok(Self::JsonIndex),
            "paged_api" => Ok(Self::PagedApi),
            other => Err(SourceError::UnknownSourceKind(other.to_string())),
        }
    }
}

/// Source adapters resolved at startup, keyed by source name.
///
/// Configuration carries a kind tag per source; resolution happens once
/// here, so an unknown tag fails fast instead of at task execution time.
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn BinarySource>>,
}

impl SourceRegistry {
    /// Build adapters for every configured source.
    pub fn from_config(
        backend: Arc<dyn HttpBackend>,
        sources: &HashMap<String, BinarySourceConfig>,
    ) -> Result<Self, SourceError> {
        let mut resolved: HashMap<String, Arc<dyn BinarySource>> = HashMap::new();
        for (name, config) in sources {
            let kind: SourceKind = config.kind.parse()?;
            let adapter: Arc<dyn BinarySource> = match kind {
                SourceKind::DirListing => {
                    Arc::new(DirListingSource::new(name, config, Arc::clone(&backend))?)
                }
                SourceKind::JsonIndex => {
                    Arc::new(JsonIndexSource::new(name, config, Arc::clone(&backend))?)
                }
                SourceKind::PagedApi => {
                    Arc::new(PagedApiSource::new(name, config, Arc::clone(&backend))?)
                }
            };
            resolved.insert(name.clone(), adapter);
        }
        Ok(Self { sources: resolved })
    }

    /// Build a registry from pre-constructed adapters (custom wiring and
    /// tests).
    #[must_use]
    pub fn from_adapters(adapters: Vec<Arc<dyn BinarySource>>) -> Self {
        let sources = adapters
            .into_iter()
            .map(|adapter| (adapter.source_name().to_string(), adapter))
            .collect();
        Self { sources }
    }

    /// Resolve a source by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn BinarySource>> {
        self.sources.get(name).map(Arc::clone)
    }

    /// All configured source names, sorted for deterministic sweeps.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }
}

/// GET listing markup; a non-200 answer is logged and surfaces as an empty
/// body so a flaky upstream degrades to "nothing new" instead of failing
/// the whole sync.
pub(crate) async fn request_listing_text(
    backend: &dyn HttpBackend,
    adapter: &str,
    url: &Url,
    timeout: Duration,
) -> Result<String, SourceError> {
    let response = backend.get_text(url, timeout).await?;
    if response.status != 200 {
        warn!(
            "[{adapter}.fetch:non-200-status] url: {url}, status: {}",
            response.status
        );
        return Ok(String::new());
    }
    Ok(response.body)
}

/// GET a listing JSON document; a non-200 answer is logged and surfaces as
/// `None`.
pub(crate) async fn request_listing_json(
    backend: &dyn HttpBackend,
    adapter: &str,
    url: &Url,
    timeout: Duration,
) -> Result<Option<serde_json::Value>, SourceError> {
    let response = backend.get_json(url, timeout).await?;
    if response.status != 200 {
        warn!(
            "[{adapter}.fetch:non-200-status] url: {url}, status: {}",
            response.status
        );
        return Ok(None);
    }
    Ok(Some(response.body))
}
