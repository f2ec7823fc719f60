//! HTTP backend abstraction.
//!
//! One trait for every outbound request the engine makes, so retry, timeout,
//! redirect, and compression policy live in a single place. The production
//! implementation uses reqwest; tests use the canned
//! [`FakeBackend`](crate::testing::FakeBackend).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::SourceError;

/// A text response with its status code.
#[derive(Clone, Debug)]
pub struct TextResponse {
    pub status: u16,
    pub body: String,
}

/// A JSON response with its status code.
///
/// On a non-success status the body may be `Null` when the upstream did not
/// answer with JSON.
#[derive(Clone, Debug)]
pub struct JsonResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl JsonResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Port for outbound HTTP.
///
/// All methods follow redirects and accept compressed bodies. Timeouts are
/// per request because archive downloads need a far larger budget than
/// metadata fetches. A timeout surfaces as [`SourceError::Timeout`], never
/// as a generic network error.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// GET a text body (directory-listing markup).
    async fn get_text(&self, url: &Url, timeout: Duration) -> Result<TextResponse, SourceError>;

    /// GET a JSON body.
    async fn get_json(&self, url: &Url, timeout: Duration) -> Result<JsonResponse, SourceError>;

    /// POST a JSON body with extra headers, returning the response status.
    async fn post_json(
        &self,
        url: &Url,
        body: &serde_json::Value,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<u16, SourceError>;

    /// PUT with an optional JSON body.
    async fn put_json(
        &self,
        url: &Url,
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonResponse, SourceError>;

    /// GET a binary body into a local file, returning the response status.
    ///
    /// Nothing is written unless the status is 2xx.
    async fn download_to_file(
        &self,
        url: &Url,
        dest: &Path,
        timeout: Duration,
    ) -> Result<u16, SourceError>;
}

/// Production HTTP backend using reqwest.
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    /// Create a backend with redirect-follow and gzip decoding enabled.
    pub fn new() -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    fn map_error(url: &Url, err: reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout {
                url: url.to_string(),
            }
        } else {
            SourceError::Network(err)
        }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn get_text(&self, url: &Url, timeout: Duration) -> Result<TextResponse, SourceError> {
        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(url, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(url, e))?;
        Ok(TextResponse { status, body })
    }

    async fn get_json(&self, url: &Url, timeout: Duration) -> Result<JsonResponse, SourceError> {
        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(url, e))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Self::map_error(url, e))?;
        match serde_json::from_str(&text) {
            Ok(body) => Ok(JsonResponse { status, body }),
            // a non-success answer is allowed to carry a non-JSON body
            Err(_) if !(200..300).contains(&status) => Ok(JsonResponse {
                status,
                body: serde_json::Value::Null,
            }),
            Err(err) => Err(SourceError::invalid_response(format!(
                "{url} answered 2xx with a non-JSON body: {err}"
            ))),
        }
    }

    async fn post_json(
        &self,
        url: &Url,
        body: &serde_json::Value,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<u16, SourceError> {
        let mut request = self.client.post(url.as_str()).timeout(timeout).json(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|e| Self::map_error(url, e))?;
        Ok(response.status().as_u16())
    }

    async fn put_json(
        &self,
        url: &Url,
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonResponse, SourceError> {
        let mut request = self.client.put(url.as_str()).timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| Self::map_error(url, e))?;
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(serde_json::Value::Null);
        Ok(JsonResponse { status, body })
    }

    async fn download_to_file(
        &self,
        url: &Url,
        dest: &Path,
        timeout: Duration,
    ) -> Result<u16, SourceError> {
        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(url, e))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Ok(status);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::map_error(url, e))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(status)
    }
}
