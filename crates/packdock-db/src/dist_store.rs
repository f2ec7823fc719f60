//! Local-filesystem blob store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use packdock_core::ports::{DistStore, RepositoryError};

/// [`DistStore`] rooted in one directory on local disk.
///
/// Registry-relative paths like `/packages/<fullname>/<v>/tar.tgz` map
/// straight onto the tree under the root. Writes of identical content are
/// idempotent by construction (same path, same bytes).
pub struct FsDistStore {
    root: PathBuf,
}

impl FsDistStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, dist_path: &str) -> PathBuf {
        self.root.join(dist_path.trim_start_matches('/'))
    }

    async fn ensure_parent(path: &Path) -> Result<(), RepositoryError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(RepositoryError::storage)?;
        }
        Ok(())
    }
}

#[async_trait]
impl DistStore for FsDistStore {
    async fn save_file(&self, dist_path: &str, local_path: &Path) -> Result<(), RepositoryError> {
        let target = self.resolve(dist_path);
        Self::ensure_parent(&target).await?;
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(RepositoryError::storage)?;
        Ok(())
    }

    async fn download_to_file(
        &self,
        dist_path: &str,
        local_path: &Path,
    ) -> Result<(), RepositoryError> {
        let source = self.resolve(dist_path);
        match tokio::fs::copy(&source, local_path).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(RepositoryError::NotFound(dist_path.to_string()))
            }
            Err(err) => Err(RepositoryError::storage(err)),
        }
    }

    async fn append_text(&self, dist_path: &str, content: &str) -> Result<(), RepositoryError> {
        let target = self.resolve(dist_path);
        Self::ensure_parent(&target).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await
            .map_err(RepositoryError::storage)?;
        file.write_all(content.as_bytes())
            .await
            .map_err(RepositoryError::storage)?;
        Ok(())
    }

    async fn read_text(&self, dist_path: &str) -> Result<Option<String>, RepositoryError> {
        match tokio::fs::read_to_string(self.resolve(dist_path)).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RepositoryError::storage(err)),
        }
    }
}
