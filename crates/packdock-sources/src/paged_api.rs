//! Paginated API client.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use packdock_core::config::BinarySourceConfig;

use crate::adapter::{BinarySource, SLOW_FETCH_TIMEOUT, request_listing_json};
use crate::error::SourceError;
use crate::http::HttpBackend;
use crate::item::{FetchResult, SizeValue, SourceItem};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct PagedApiOptions {
    /// Page size requested from the API.
    per_page: usize,

    /// Download statuses to tolerate for every listed artifact.
    ignore_download_statuses: Option<Vec<u16>>,
}

impl Default for PagedApiOptions {
    fn default() -> Self {
        Self {
            per_page: 100,
            ignore_download_statuses: None,
        }
    }
}

/// Walks a file-listing API that pages with `page`/`per_page` parameters.
///
/// The current page number is threaded through the opaque continuation
/// cursor; a short page ends the branch. These APIs front large archive
/// stores and answer slowly, so fetches run with the long timeout.
///
/// Expected response shape, one JSON array per page:
///
/// ```json
/// [{"name": "...", "type": "dir|file", "download_url": "...",
///   "size": 123, "date": "2022-04-18T20:51:53.788Z"}]
/// ```
pub struct PagedApiSource {
    name: String,
    dist_url: String,
    options: PagedApiOptions,
    backend: Arc<dyn HttpBackend>,
}

impl PagedApiSource {
    pub fn new(
        name: &str,
        config: &BinarySourceConfig,
        backend: Arc<dyn HttpBackend>,
    ) -> Result<Self, SourceError> {
        let options: PagedApiOptions = if config.options.is_null() {
            PagedApiOptions::default()
        } else {
            serde_json::from_value(config.options.clone())?
        };
        Ok(Self {
            name: name.to_string(),
            dist_url: config.dist_url.trim_end_matches('/').to_string(),
            options,
            backend,
        })
    }

    fn parse_item(&self, entry: &serde_json::Value) -> Option<SourceItem> {
        let name = entry["name"].as_str()?;
        let is_dir = entry["type"].as_str() == Some("dir");
        let date = entry["date"].as_str().unwrap_or_default().to_string();
        if is_dir {
            return Some(SourceItem::dir(format!("{}/", name.trim_end_matches('/')), date));
        }
        let size = entry["size"]
            .as_u64()
            .map_or_else(SizeValue::dir_sentinel, SizeValue::Number);
        let mut item = SourceItem::file(
            name,
            entry["download_url"].as_str().unwrap_or_default(),
            size,
            date,
        );
        item.ignore_download_statuses = self.options.ignore_download_statuses.clone();
        Some(item)
    }
}

#[async_trait]
impl BinarySource for PagedApiSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        dir: &str,
        cursor: Option<&serde_json::Value>,
    ) -> Result<Option<FetchResult>, SourceError> {
        let page = cursor.and_then(serde_json::Value::as_u64).unwrap_or(1);
        let mut url = Url::parse(&format!("{}{dir}", self.dist_url))?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &self.options.per_page.to_string());

        let Some(body) = request_listing_json(
            self.backend.as_ref(),
            "PagedApiSource",
            &url,
            SLOW_FETCH_TIMEOUT,
        )
        .await?
        else {
            // a failing page ends the branch instead of failing the sync
            return Ok(Some(FetchResult::default()));
        };

        let Some(entries) = body.as_array() else {
            return Err(SourceError::invalid_response(format!(
                "{url} did not answer with a page array"
            )));
        };

        let items: Vec<SourceItem> = entries
            .iter()
            .filter_map(|entry| self.parse_item(entry))
            .collect();
        let next_cursor = if entries.len() >= self.options.per_page {
            Some(serde_json::json!(page + 1))
        } else {
            None
        };
        Ok(Some(FetchResult { items, next_cursor }))
    }
}
