//! Error types for upstream operations.

use thiserror::Error;

/// Errors from the upstream registry and the binary source adapters.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The upstream answered with a non-success status on a request that
    /// required one.
    #[error("upstream request failed with status {status}: {url}")]
    Status { status: u16, url: String },

    /// The requested package does not exist upstream.
    #[error("'{fullname}' not found in upstream registry")]
    NotFound { fullname: String },

    /// The request exceeded its deadline.
    #[error("upstream request timed out: {url}")]
    Timeout { url: String },

    /// Network or HTTP client error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The upstream answered with a body this client cannot use.
    #[error("invalid upstream response: {message}")]
    InvalidResponse { message: String },

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A binary source is configured with a kind outside the closed registry.
    #[error("unknown source kind: {0}")]
    UnknownSourceKind(String),

    /// Local I/O error while persisting a download.
    #[error("io error: {0}")]
    Io(String),
}

impl SourceError {
    /// Create an invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
