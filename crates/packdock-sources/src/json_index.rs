//! JSON version-index reader.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use packdock_core::config::BinarySourceConfig;

use crate::adapter::{BinarySource, FETCH_TIMEOUT, request_listing_json};
use crate::error::SourceError;
use crate::http::HttpBackend;
use crate::item::{FetchResult, SizeValue, SourceItem};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct JsonIndexOptions {
    /// Platform directories listed under every version.
    platforms: Vec<String>,

    /// File name of the artifact in each platform directory.
    file_name: String,

    /// Download URL template with `{version}` and `{platform}` placeholders.
    download_url: String,
}

impl Default for JsonIndexOptions {
    fn default() -> Self {
        Self {
            platforms: vec![
                "darwin-x64".to_string(),
                "linux-x64".to_string(),
                "win32-x64".to_string(),
            ],
            file_name: "download.zip".to_string(),
            download_url: String::new(),
        }
    }
}

/// Reads a registry manifest as a version index.
///
/// The index document is the upstream package manifest: `versions` keys
/// become the top-level directories, configured platforms the second level,
/// and the leaf of each platform directory is a single artifact whose URL
/// comes from the download template. The document is fetched once per
/// traversal in [`init_fetch`](BinarySource::init_fetch) and dropped in
/// [`finish_fetch`](BinarySource::finish_fetch).
pub struct JsonIndexSource {
    name: String,
    index_url: String,
    options: JsonIndexOptions,
    backend: Arc<dyn HttpBackend>,
    index: Mutex<Option<serde_json::Value>>,
}

impl JsonIndexSource {
    pub fn new(
        name: &str,
        config: &BinarySourceConfig,
        backend: Arc<dyn HttpBackend>,
    ) -> Result<Self, SourceError> {
        let options: JsonIndexOptions = if config.options.is_null() {
            JsonIndexOptions::default()
        } else {
            serde_json::from_value(config.options.clone())?
        };
        Ok(Self {
            name: name.to_string(),
            index_url: config.dist_url.clone(),
            options,
            backend,
            index: Mutex::new(None),
        })
    }

    /// Load the index document, reusing the traversal cache.
    async fn index(&self) -> Result<Option<serde_json::Value>, SourceError> {
        let mut cached = self.index.lock().await;
        if cached.is_none() {
            let url = Url::parse(&self.index_url)?;
            *cached = request_listing_json(
                self.backend.as_ref(),
                "JsonIndexSource",
                &url,
                FETCH_TIMEOUT,
            )
            .await?;
        }
        Ok(cached.clone())
    }

    fn publish_date(index: &serde_json::Value, version: &str) -> String {
        index["time"][version]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    fn download_url(&self, version: &str, platform: &str) -> String {
        self.options
            .download_url
            .replace("{version}", version)
            .replace("{platform}", platform)
    }
}

#[async_trait]
impl BinarySource for JsonIndexSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn init_fetch(&self) -> Result<(), SourceError> {
        self.index().await.map(|_| ())
    }

    async fn fetch(
        &self,
        dir: &str,
        _cursor: Option<&serde_json::Value>,
    ) -> Result<Option<FetchResult>, SourceError> {
        let Some(index) = self.index().await? else {
            // the upstream answered non-200; nothing to mirror this round
            return Ok(Some(FetchResult::default()));
        };

        let segments: Vec<&str> = dir.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
        let items = match segments.as_slice() {
            // root: one directory per published version
            [] => {
                let Some(versions) = index["versions"].as_object() else {
                    return Err(SourceError::invalid_response(format!(
                        "{} index has no versions map",
                        self.index_url
                    )));
                };
                versions
                    .keys()
                    .map(|version| {
                        SourceItem::dir(
                            format!("{version}/"),
                            Self::publish_date(&index, version),
                        )
                    })
                    .collect()
            }
            // one version: the configured platform directories
            [version] => {
                let date = Self::publish_date(&index, version);
                self.options
                    .platforms
                    .iter()
                    .map(|platform| SourceItem::dir(format!("{platform}/"), date.clone()))
                    .collect()
            }
            // one platform: a single artifact
            [version, platform] => vec![SourceItem::file(
                self.options.file_name.clone(),
                self.download_url(version, platform),
                SizeValue::dir_sentinel(),
                Self::publish_date(&index, version),
            )],
            _ => Vec::new(),
        };
        Ok(Some(FetchResult::finished(items)))
    }

    async fn finish_fetch(&self, _success: bool) -> Result<(), SourceError> {
        *self.index.lock().await = None;
        Ok(())
    }
}
