//! Upstream registry client.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::info;
use url::Url;

use crate::error::SourceError;
use crate::http::{HttpBackend, JsonResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Full manifests of heavyweight packages take well over a minute upstream.
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(120);

const MANIFEST_RETRIES: u8 = 3;

/// Client for the upstream source registry.
///
/// Manifest fetches are retried with a jittered backoff; a timeout aborts
/// immediately instead of burning the remaining attempts on a dead
/// upstream.
pub struct RegistryClient {
    backend: Arc<dyn HttpBackend>,
    base_url: Url,
    retry_base_delay: Duration,
}

impl RegistryClient {
    pub fn new(backend: Arc<dyn HttpBackend>, registry: &str) -> Result<Self, SourceError> {
        let base_url = Url::parse(registry)?;
        Ok(Self {
            backend,
            base_url,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    /// Override the retry backoff base (tests use zero).
    #[must_use]
    pub const fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn package_url(&self, fullname: &str) -> Result<Url, SourceError> {
        // query t=timestamp so a CDN in front of the upstream cannot answer
        // from cache; cache=0 marks sync worker traffic
        let mut url = self
            .base_url
            .join(&urlencoding::encode(fullname))?;
        url.query_pairs_mut()
            .append_pair("t", &Utc::now().timestamp_millis().to_string())
            .append_pair("cache", "0");
        Ok(url)
    }

    /// Jitter of one to four base delays, so racing workers spread out.
    fn retry_delay(&self) -> Duration {
        let base_ms = u64::try_from(self.retry_base_delay.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms.saturating_mul(3));
        Duration::from_millis(base_ms + jitter_ms)
    }

    /// Fetch the full package manifest.
    ///
    /// 404 is a permanent answer and fails immediately; other non-success
    /// statuses and network errors are retried up to the attempt ceiling.
    pub async fn get_full_manifest(
        &self,
        fullname: &str,
    ) -> Result<serde_json::Value, SourceError> {
        let url = self.package_url(fullname)?;
        let mut last_error: Option<SourceError> = None;

        for attempt in 0..MANIFEST_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay()).await;
            }
            match self.backend.get_json(&url, MANIFEST_TIMEOUT).await {
                Ok(response) if response.status == 200 => {
                    info!(
                        "[RegistryClient:getFullManifest] GET {url}, status: {}",
                        response.status
                    );
                    return Ok(response.body);
                }
                Ok(response) if response.status == 404 => {
                    return Err(SourceError::NotFound {
                        fullname: fullname.to_string(),
                    });
                }
                Ok(response) => {
                    last_error = Some(SourceError::Status {
                        status: response.status,
                        url: url.to_string(),
                    });
                }
                Err(err @ SourceError::Timeout { .. }) => return Err(err),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            SourceError::invalid_response(format!("manifest fetch gave no answer: {url}"))
        }))
    }

    /// Ask another registry instance to sync a package
    /// (`PUT /<name>/sync`).
    pub async fn create_sync_task(&self, fullname: &str) -> Result<JsonResponse, SourceError> {
        let mut url = self
            .base_url
            .join(&format!("{}/sync", urlencoding::encode(fullname)))?;
        url.query_pairs_mut().append_pair("sync_upstream", "true");
        self.backend.put_json(&url, None, DEFAULT_TIMEOUT).await
    }

    /// Read a remote sync task's log (`GET /<name>/sync/log/<id>`).
    pub async fn get_sync_task_log(
        &self,
        fullname: &str,
        log_id: &str,
        offset: usize,
    ) -> Result<JsonResponse, SourceError> {
        let mut url = self.base_url.join(&format!(
            "{}/sync/log/{log_id}",
            urlencoding::encode(fullname)
        ))?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string());
        self.backend.get_json(&url, DEFAULT_TIMEOUT).await
    }
}
