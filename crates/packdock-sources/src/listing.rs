//! HTML directory-listing scraper.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use packdock_core::config::BinarySourceConfig;

use crate::adapter::{BinarySource, FETCH_TIMEOUT, request_listing_text};
use crate::error::SourceError;
use crate::http::HttpBackend;
use crate::item::{FetchResult, SizeValue, SourceItem};

/// Scrapes nginx-style directory-listing markup into items.
///
/// The pattern tolerates both markup shapes these listings have shipped
/// over the years:
///
/// ```text
/// <a href="v9.8.0/">v9.8.0/</a>                         08-Mar-2018 01:55       -
/// <a href="index.json">index.json</a>                   17-Dec-2021 23:16  219862
/// ```
///
/// ```text
/// <a href="docs/">docs/</a>                                             -       -
/// <a href="/dist/v18.15.0/SHASUMS256.txt">SHASUMS256.txt</a>  04-Nov-2024 17:29  3.2 KB
/// ```
///
/// Zero-byte entries are skipped, absolute hrefs are stripped down to the
/// bare filename, and the `-` size sentinel is carried through untouched.
pub struct DirListingSource {
    name: String,
    dist_url: String,
    ignore_files: Vec<String>,
    backend: Arc<dyn HttpBackend>,
    row_re: Regex,
}

impl DirListingSource {
    pub fn new(
        name: &str,
        config: &BinarySourceConfig,
        backend: Arc<dyn HttpBackend>,
    ) -> Result<Self, SourceError> {
        let row_re = Regex::new(
            r#"(?i)<a href="([^"]+?)"[^>]*?>[^<]+?</a>\s+?((?:[\w-]+? \w{2}:\d{2})|-)\s+?([\d.\-\s\w]+)"#,
        )
        .map_err(|e| SourceError::invalid_response(format!("listing pattern: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            dist_url: config.dist_url.trim_end_matches('/').to_string(),
            ignore_files: config.ignore_files.clone(),
            backend,
            row_re,
        })
    }

    fn parse(&self, dir: &str, base_url: &str, html: &str) -> Vec<SourceItem> {
        let mut items = Vec::new();
        for captures in self.row_re.captures_iter(html) {
            let mut name = captures[1].to_string();
            let is_dir = name.ends_with('/');
            if !is_dir {
                // '/dist/v18.15.0/SHASUMS256.txt' => 'SHASUMS256.txt'
                if let Some(basename) = name.rsplit('/').next() {
                    name = basename.to_string();
                }
            }
            let date = captures[2].to_string();
            let size = captures[3].trim().to_string();
            if size == "0" {
                continue;
            }
            if self.ignore_files.iter().any(|f| f == &format!("{dir}{name}")) {
                continue;
            }
            let url = if is_dir {
                String::new()
            } else {
                format!("{base_url}{name}")
            };
            items.push(SourceItem {
                name,
                is_dir,
                url,
                size: SizeValue::Text(size),
                date,
                ignore_download_statuses: None,
            });
        }
        items
    }
}

#[async_trait]
impl BinarySource for DirListingSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        dir: &str,
        _cursor: Option<&serde_json::Value>,
    ) -> Result<Option<FetchResult>, SourceError> {
        let base_url = format!("{}{dir}", self.dist_url);
        let url = Url::parse(&base_url)?;
        let html =
            request_listing_text(self.backend.as_ref(), "DirListingSource", &url, FETCH_TIMEOUT)
                .await?;
        Ok(Some(FetchResult::finished(self.parse(dir, &base_url, &html))))
    }
}
