//! Package manager port.
//!
//! The package-manifest business rules (semver resolution, tag rules,
//! validation) live behind this port; the sync engine only needs to diff
//! versions, publish what is missing, and keep dist-tags in step.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::RepositoryError;

/// Minimal view of a known package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub package_id: String,
    pub scope: String,
    pub name: String,
    pub fullname: String,
}

/// Command to publish one version during a sync.
#[derive(Clone, Debug)]
pub struct PublishVersionCmd {
    pub fullname: String,
    pub version: String,
    /// The upstream version manifest, stored verbatim.
    pub manifest: serde_json::Value,
    /// Local path of the already-downloaded tarball.
    pub tarball: PathBuf,
}

/// Result of a publish attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The version was created.
    Published {
        package_version_id: String,
        /// Blob-store path the tarball was saved under.
        tar_dist_path: String,
    },
    /// The version already existed; nothing was written.
    AlreadyExists,
}

/// Port for package lookups and publishes.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Find a package by fullname (`name` or `@scope/name`).
    async fn find_package(&self, fullname: &str)
    -> Result<Option<PackageSummary>, RepositoryError>;

    /// List all published version strings of a package.
    async fn list_published_versions(
        &self,
        fullname: &str,
    ) -> Result<Vec<String>, RepositoryError>;

    /// Publish one version; repeated publishes of the same version are
    /// idempotent and report [`PublishOutcome::AlreadyExists`].
    async fn publish_version(
        &self,
        cmd: &PublishVersionCmd,
    ) -> Result<PublishOutcome, RepositoryError>;

    /// Resolve a dist-tag to a version.
    async fn find_version_by_tag(
        &self,
        fullname: &str,
        tag: &str,
    ) -> Result<Option<String>, RepositoryError>;

    /// Point a dist-tag at a version (create or move).
    async fn set_tag(
        &self,
        fullname: &str,
        tag: &str,
        version: &str,
    ) -> Result<(), RepositoryError>;
}
