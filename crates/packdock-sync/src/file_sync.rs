//! Package-version file extraction.
//!
//! Published tarballs can be browsed per file; this service downloads the
//! tarball, extracts it, and records one entry per file. Extraction for one
//! version is serialized with the `<versionId>:syncFiles` lock, and a
//! corrupt archive degrades to an empty result instead of poisoning the
//! retry loop.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use packdock_core::lock::LockManager;
use packdock_core::ports::{
    DistStore, RepositoryError, VersionFileRecord, VersionFileRepository,
};

use crate::error::SyncError;

const SYNC_FILES_LOCK_TTL_SECS: u64 = 60;

pub struct FileSyncService {
    files: Arc<dyn VersionFileRepository>,
    dist: Arc<dyn DistStore>,
    lock: Arc<LockManager>,
}

impl FileSyncService {
    pub fn new(
        files: Arc<dyn VersionFileRepository>,
        dist: Arc<dyn DistStore>,
        lock: Arc<LockManager>,
    ) -> Self {
        Self { files, dist, lock }
    }

    /// Extract a version's files unless that already happened.
    ///
    /// Lock contention means another worker is extracting right now; the
    /// caller gets a retryable conflict and should try again later.
    pub async fn ensure_version_files(
        &self,
        package_version_id: &str,
        tar_dist_path: &str,
    ) -> Result<usize, SyncError> {
        if self.files.has_files(package_version_id).await? {
            return Ok(0);
        }
        let lock_name = format!("{package_version_id}:syncFiles");
        let ran = self
            .lock
            .with_lock(&lock_name, SYNC_FILES_LOCK_TTL_SECS, || {
                self.sync_version_files(package_version_id, tar_dist_path)
            })
            .await?;
        match ran {
            Some(result) => result.map(|records| records.len()),
            None => {
                warn!("[FileSyncService.ensureVersionFiles] lock {lock_name} busy");
                Err(SyncError::lock_held(lock_name))
            }
        }
    }

    /// Download, extract, and record every file of a version.
    ///
    /// Re-running is idempotent: files that already have a record are
    /// returned as-is without re-writing their content.
    pub async fn sync_version_files(
        &self,
        package_version_id: &str,
        tar_dist_path: &str,
    ) -> Result<Vec<VersionFileRecord>, SyncError> {
        let scratch = tempfile::tempdir()?;
        let tar_file = scratch.path().join("package.tgz");
        self.dist.download_to_file(tar_dist_path, &tar_file).await?;

        let extract_dir = scratch.path().join("package");
        tokio::fs::create_dir_all(&extract_dir).await?;
        let entries = {
            let tar_file = tar_file.clone();
            let extract_dir = extract_dir.clone();
            tokio::task::spawn_blocking(move || extract_tarball(&tar_file, &extract_dir))
                .await
                .map_err(|err| SyncError::Io(err.to_string()))?
        };
        let entries = match entries {
            Ok(entries) => entries,
            Err(err @ SyncError::BadArchive { .. }) => {
                warn!(
                    "[FileSyncService.syncVersionFiles:bad-archive] versionId: {package_version_id}, tar: {tar_dist_path}, error: {err}"
                );
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let mut records = Vec::with_capacity(entries.len());
        for (path, local) in entries {
            records.push(
                self.save_version_file(package_version_id, &path, &local)
                    .await?,
            );
        }
        Ok(records)
    }

    async fn save_version_file(
        &self,
        package_version_id: &str,
        path: &str,
        local: &Path,
    ) -> Result<VersionFileRecord, SyncError> {
        let (directory, name) = split_directory_and_name(path);
        if let Some(existing) = self
            .files
            .find_file(package_version_id, &directory, &name)
            .await?
        {
            return Ok(existing);
        }

        let dist_path = format!("/packages/{package_version_id}/files{path}");
        self.dist.save_file(&dist_path, local).await?;
        let size = tokio::fs::metadata(local).await.map(|m| m.len()).unwrap_or(0);
        let record = VersionFileRecord::new(
            package_version_id,
            directory.clone(),
            name.clone(),
            dist_path,
            size,
            content_type_for(path),
        );
        match self.files.create_file(&record).await {
            Ok(()) => Ok(record),
            // a racing extraction inserted it first
            Err(RepositoryError::AlreadyExists(_)) => Ok(self
                .files
                .find_file(package_version_id, &directory, &name)
                .await?
                .unwrap_or(record)),
            Err(err) => Err(err.into()),
        }
    }
}

/// Extract a gzipped tarball, stripping the leading `package/` component.
///
/// Returns `(registry path, local path)` pairs like
/// `("/lib/index.js", <tmp>/lib/index.js)`. Hidden path segments and
/// anything trying to escape the destination are skipped. Every archive
/// parsing failure maps to [`SyncError::BadArchive`].
fn extract_tarball(tar_file: &Path, dest: &Path) -> Result<Vec<(String, PathBuf)>, SyncError> {
    let file = std::fs::File::open(tar_file).map_err(SyncError::from)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|err| SyncError::bad_archive(err.to_string()))?;

    let mut out = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|err| SyncError::bad_archive(err.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|err| SyncError::bad_archive(err.to_string()))?
            .into_owned();
        // strip the first dir, e.g. 'package/' or 'lodash-es/'
        let rel: PathBuf = path.components().skip(1).collect();
        if rel.as_os_str().is_empty() {
            continue;
        }
        let safe = rel.components().all(|c| match c {
            Component::Normal(part) => !part.to_string_lossy().starts_with('.'),
            _ => false,
        });
        if !safe {
            continue;
        }

        let dest_path = dest.join(&rel);
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent).map_err(SyncError::from)?;
        }
        entry
            .unpack(&dest_path)
            .map_err(|err| SyncError::bad_archive(err.to_string()))?;
        out.push((format!("/{}", rel.to_string_lossy()), dest_path));
    }
    Ok(out)
}

/// `/lib/index.js` -> (`/lib`, `index.js`); `/index.js` -> (`/`, `index.js`).
fn split_directory_and_name(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((directory, name)) => (directory.to_string(), name.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("js" | "mjs" | "cjs") => "application/javascript",
        Some("json") => "application/json",
        Some("md" | "markdown") => "text/markdown",
        Some("ts") => "video/mp2t",
        Some("css") => "text/css",
        Some("html") => "text/html",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
