//! Blob storage port.

use std::path::Path;

use async_trait::async_trait;

use super::RepositoryError;

/// Port for content storage (local disk, NFS, object storage).
///
/// The engine trusts the store to be idempotent on repeated writes of
/// identical content; `dist_path` keys are registry-relative paths like
/// `/packages/<fullname>/<version>/tar.tgz`.
#[async_trait]
pub trait DistStore: Send + Sync {
    /// Store a local file under `dist_path`, replacing any previous content.
    async fn save_file(&self, dist_path: &str, local_path: &Path)
    -> Result<(), RepositoryError>;

    /// Copy the content at `dist_path` into a local file.
    ///
    /// Missing content is [`RepositoryError::NotFound`].
    async fn download_to_file(
        &self,
        dist_path: &str,
        local_path: &Path,
    ) -> Result<(), RepositoryError>;

    /// Append text to `dist_path`, creating it if absent.
    ///
    /// Execution logs are streamed through this; they are never rewritten.
    async fn append_text(&self, dist_path: &str, content: &str) -> Result<(), RepositoryError>;

    /// Read the full text content at `dist_path`, if present.
    async fn read_text(&self, dist_path: &str) -> Result<Option<String>, RepositoryError>;
}
