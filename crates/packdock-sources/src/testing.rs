//! Canned HTTP backend for tests.
//!
//! Downstream crates enable the `test-utils` feature to drive executors
//! against scripted upstream behavior without a network.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::SourceError;
use crate::http::{HttpBackend, JsonResponse, TextResponse};

#[derive(Debug)]
enum Canned {
    Text { status: u16, body: String },
    Json { status: u16, body: serde_json::Value },
    /// One response per request, repeating the last when exhausted.
    JsonSequence(VecDeque<(u16, serde_json::Value)>),
    Download { status: u16, bytes: Vec<u8> },
    Status(u16),
}

/// A recorded POST delivery.
#[derive(Clone, Debug)]
pub struct PostRecord {
    pub url: String,
    pub body: serde_json::Value,
    pub headers: Vec<(String, String)>,
}

/// A fake [`HttpBackend`] that answers from canned responses.
///
/// Responses are matched by URL substring; unmatched requests answer 404.
/// Every request is recorded for assertions.
#[derive(Debug, Default)]
pub struct FakeBackend {
    entries: Mutex<Vec<(String, Canned)>>,
    requests: Mutex<Vec<String>>,
    posts: Mutex<Vec<PostRecord>>,
    downloads: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Can a text body for URLs containing `pattern`.
    #[must_use]
    pub fn with_text(self, pattern: &str, status: u16, body: &str) -> Self {
        self.push(pattern, Canned::Text {
            status,
            body: body.to_string(),
        });
        self
    }

    /// Can a JSON body for URLs containing `pattern`.
    #[must_use]
    pub fn with_json(self, pattern: &str, status: u16, body: serde_json::Value) -> Self {
        self.push(pattern, Canned::Json { status, body });
        self
    }

    /// Can a sequence of JSON answers, one per request.
    #[must_use]
    pub fn with_json_sequence(
        self,
        pattern: &str,
        responses: Vec<(u16, serde_json::Value)>,
    ) -> Self {
        self.push(pattern, Canned::JsonSequence(responses.into()));
        self
    }

    /// Can a binary download for URLs containing `pattern`.
    #[must_use]
    pub fn with_download(self, pattern: &str, status: u16, bytes: &[u8]) -> Self {
        self.push(pattern, Canned::Download {
            status,
            bytes: bytes.to_vec(),
        });
        self
    }

    /// Can a bare status (for POST/PUT endpoints).
    #[must_use]
    pub fn with_status(self, pattern: &str, status: u16) -> Self {
        self.push(pattern, Canned::Status(status));
        self
    }

    fn push(&self, pattern: &str, canned: Canned) {
        self.entries
            .lock()
            .unwrap()
            .push((pattern.to_string(), canned));
    }

    fn record(&self, url: &Url) {
        self.requests.lock().unwrap().push(url.to_string());
    }

    /// All request URLs seen so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests seen so far (downloads included).
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// All recorded POST deliveries.
    pub fn posts(&self) -> Vec<PostRecord> {
        self.posts.lock().unwrap().clone()
    }

    /// URLs that were downloaded to a file (2xx answers only).
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    fn answer_json(&self, url: &Url) -> JsonResponse {
        let mut entries = self.entries.lock().unwrap();
        for (pattern, canned) in entries.iter_mut() {
            if !url.as_str().contains(pattern.as_str()) {
                continue;
            }
            return match canned {
                Canned::Json { status, body } => JsonResponse {
                    status: *status,
                    body: body.clone(),
                },
                Canned::JsonSequence(responses) => {
                    let (status, body) = if responses.len() > 1 {
                        responses.pop_front().unwrap()
                    } else {
                        responses.front().cloned().unwrap_or((404, serde_json::Value::Null))
                    };
                    JsonResponse { status, body }
                }
                Canned::Status(status) => JsonResponse {
                    status: *status,
                    body: serde_json::Value::Null,
                },
                _ => continue,
            };
        }
        JsonResponse {
            status: 404,
            body: serde_json::Value::Null,
        }
    }
}

#[async_trait]
impl HttpBackend for FakeBackend {
    async fn get_text(&self, url: &Url, _timeout: Duration) -> Result<TextResponse, SourceError> {
        self.record(url);
        let entries = self.entries.lock().unwrap();
        for (pattern, canned) in entries.iter() {
            if let Canned::Text { status, body } = canned {
                if url.as_str().contains(pattern.as_str()) {
                    return Ok(TextResponse {
                        status: *status,
                        body: body.clone(),
                    });
                }
            }
        }
        Ok(TextResponse {
            status: 404,
            body: String::new(),
        })
    }

    async fn get_json(&self, url: &Url, _timeout: Duration) -> Result<JsonResponse, SourceError> {
        self.record(url);
        Ok(self.answer_json(url))
    }

    async fn post_json(
        &self,
        url: &Url,
        body: &serde_json::Value,
        headers: &[(String, String)],
        _timeout: Duration,
    ) -> Result<u16, SourceError> {
        self.record(url);
        self.posts.lock().unwrap().push(PostRecord {
            url: url.to_string(),
            body: body.clone(),
            headers: headers.to_vec(),
        });
        Ok(self.answer_json(url).status)
    }

    async fn put_json(
        &self,
        url: &Url,
        _body: Option<&serde_json::Value>,
        _timeout: Duration,
    ) -> Result<JsonResponse, SourceError> {
        self.record(url);
        Ok(self.answer_json(url))
    }

    async fn download_to_file(
        &self,
        url: &Url,
        dest: &Path,
        _timeout: Duration,
    ) -> Result<u16, SourceError> {
        self.record(url);
        let (status, bytes) = {
            let entries = self.entries.lock().unwrap();
            let mut answer = (404, Vec::new());
            for (pattern, canned) in entries.iter() {
                if !url.as_str().contains(pattern.as_str()) {
                    continue;
                }
                match canned {
                    Canned::Download { status, bytes } => {
                        answer = (*status, bytes.clone());
                        break;
                    }
                    Canned::Status(status) => {
                        answer = (*status, Vec::new());
                        break;
                    }
                    _ => {}
                }
            }
            answer
        };
        if (200..300).contains(&status) {
            tokio::fs::write(dest, &bytes).await?;
            self.downloads.lock().unwrap().push(url.to_string());
        }
        Ok(status)
    }
}
