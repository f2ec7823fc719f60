//! Extracted package-version file records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RepositoryError;

/// One file extracted from a published version's tarball, keyed
/// `(package_version_id, directory, name)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionFileRecord {
    pub file_id: String,
    pub package_version_id: String,
    /// Directory inside the package, `/` for the root.
    pub directory: String,
    pub name: String,
    /// Blob-store path of the file contents.
    pub dist_path: String,
    pub size: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl VersionFileRecord {
    pub fn new(
        package_version_id: impl Into<String>,
        directory: impl Into<String>,
        name: impl Into<String>,
        dist_path: impl Into<String>,
        size: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            file_id: Uuid::new_v4().simple().to_string(),
            package_version_id: package_version_id.into(),
            directory: directory.into(),
            name: name.into(),
            dist_path: dist_path.into(),
            size,
            content_type: content_type.into(),
            created_at: Utc::now(),
        }
    }
}

/// Port for the extracted-file record store.
#[async_trait]
pub trait VersionFileRepository: Send + Sync {
    /// Whether any files were already extracted for a version.
    async fn has_files(&self, package_version_id: &str) -> Result<bool, RepositoryError>;

    /// Find one file record by its natural key.
    async fn find_file(
        &self,
        package_version_id: &str,
        directory: &str,
        name: &str,
    ) -> Result<Option<VersionFileRecord>, RepositoryError>;

    /// Create a file record; duplicates report
    /// [`RepositoryError::AlreadyExists`].
    async fn create_file(&self, record: &VersionFileRecord) -> Result<(), RepositoryError>;
}
