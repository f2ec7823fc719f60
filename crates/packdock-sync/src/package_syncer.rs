//! Package sync executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use packdock_core::config::SyncConfig;
use packdock_core::lock::LockManager;
use packdock_core::ports::{PackageManager, PublishOutcome, PublishVersionCmd};
use packdock_core::task::{SyncPackageData, Task, TaskType};
use packdock_sources::{HttpBackend, RegistryClient, SourceError};

use crate::error::SyncError;
use crate::file_sync::FileSyncService;
use crate::task_service::TaskService;
use crate::worker::TaskExecutor;

/// Tarballs of heavyweight packages need the long budget.
const TARBALL_TIMEOUT: Duration = Duration::from_secs(120);

const PUBLISH_LOCK_TTL_SECS: u64 = 60;

/// Syncs one package from the upstream registry.
///
/// Holds the `<fullname>:publish` lock for the whole diff-and-publish pass
/// so a concurrent user publish or a second sync worker cannot interleave.
/// Re-running over an already-synced package is a no-op: published versions
/// are detected and skipped, never re-written.
pub struct PackageSyncer {
    registry: Arc<RegistryClient>,
    backend: Arc<dyn HttpBackend>,
    packages: Arc<dyn PackageManager>,
    lock: Arc<LockManager>,
    task_service: Arc<TaskService>,
    file_sync: Arc<FileSyncService>,
    config: Arc<SyncConfig>,
}

impl PackageSyncer {
    pub fn new(
        registry: Arc<RegistryClient>,
        backend: Arc<dyn HttpBackend>,
        packages: Arc<dyn PackageManager>,
        lock: Arc<LockManager>,
        task_service: Arc<TaskService>,
        file_sync: Arc<FileSyncService>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            registry,
            backend,
            packages,
            lock,
            task_service,
            file_sync,
            config,
        }
    }

    async fn sync_package(
        &self,
        task: &Task,
        data: &SyncPackageData,
    ) -> Result<(), SyncError> {
        let fullname = &task.target_name;
        if let Some(tips) = &data.tips {
            self.task_service.append_task_log(task, tips).await;
        }
        self.task_service
            .append_task_log(task, &format!("syncing '{fullname}' from upstream"))
            .await;

        let manifest = match self.registry.get_full_manifest(fullname).await {
            Ok(manifest) => manifest,
            Err(SourceError::NotFound { .. }) => {
                self.task_service
                    .append_task_log(task, &format!("'{fullname}' not found upstream, give up"))
                    .await;
                return Err(SyncError::not_found(fullname));
            }
            Err(err) => return Err(err.into()),
        };

        let empty = serde_json::Map::new();
        let versions = manifest["versions"].as_object().unwrap_or(&empty);
        let local: std::collections::HashSet<String> = self
            .packages
            .list_published_versions(fullname)
            .await?
            .into_iter()
            .collect();

        let scratch = tempfile::tempdir()?;
        let mut published = 0usize;
        for (version, version_manifest) in versions {
            if let Some(wanted) = &data.specific_versions {
                if !wanted.contains(version) {
                    continue;
                }
            }
            if local.contains(version) {
                continue;
            }
            if self
                .publish_one_version(task, fullname, version, version_manifest, scratch.path())
                .await?
            {
                published += 1;
            }
        }

        let synced_tags = self.sync_tags(fullname, &manifest).await?;
        self.task_service
            .append_task_log(
                task,
                &format!("done, {published} new versions, {synced_tags} tags updated"),
            )
            .await;
        Ok(())
    }

    /// Download and publish one version; returns whether it was actually
    /// published (a racing worker may have beaten us to it).
    async fn publish_one_version(
        &self,
        task: &Task,
        fullname: &str,
        version: &str,
        version_manifest: &serde_json::Value,
        scratch: &std::path::Path,
    ) -> Result<bool, SyncError> {
        let Some(tarball_url) = version_manifest["dist"]["tarball"].as_str() else {
            self.task_service
                .append_task_log(task, &format!("{fullname}@{version} has no tarball, skip"))
                .await;
            return Ok(false);
        };
        let url = Url::parse(tarball_url)
            .map_err(|err| SyncError::invalid_data(format!("bad tarball url: {err}")))?;

        let local = scratch.join(format!("{}-{version}.tgz", fullname.replace('/', "_")));
        let status = self
            .backend
            .download_to_file(&url, &local, TARBALL_TIMEOUT)
            .await?;
        if status == 404 {
            // upstream manifest advertises a tarball it no longer serves
            self.task_service
                .append_task_log(task, &format!("tarball of {fullname}@{version} is gone, skip"))
                .await;
            return Ok(false);
        }
        if !(200..300).contains(&status) {
            return Err(SyncError::upstream(status, url.as_str()));
        }

        let cmd = PublishVersionCmd {
            fullname: fullname.to_string(),
            version: version.to_string(),
            manifest: version_manifest.clone(),
            tarball: local,
        };
        match self.packages.publish_version(&cmd).await? {
            PublishOutcome::AlreadyExists => {
                self.task_service
                    .append_task_log(task, &format!("{fullname}@{version} already published, skip"))
                    .await;
                Ok(false)
            }
            PublishOutcome::Published {
                package_version_id,
                tar_dist_path,
            } => {
                self.task_service
                    .append_task_log(task, &format!("published {fullname}@{version}"))
                    .await;
                if self.config.enable_file_sync {
                    // file extraction is best effort; a busy lock or a bad
                    // archive must not fail the package sync
                    if let Err(err) = self
                        .file_sync
                        .ensure_version_files(&package_version_id, &tar_dist_path)
                        .await
                    {
                        warn!(
                            "[PackageSyncer.executeTask:syncFiles:error] versionId: {package_version_id}, error: {err}"
                        );
                    }
                }
                Ok(true)
            }
        }
    }

    /// Bring local dist-tags in step with the upstream manifest.
    async fn sync_tags(
        &self,
        fullname: &str,
        manifest: &serde_json::Value,
    ) -> Result<usize, SyncError> {
        let empty = serde_json::Map::new();
        let tags = manifest["dist-tags"].as_object().unwrap_or(&empty);
        let mut updated = 0usize;
        for (tag, version) in tags {
            let Some(version) = version.as_str() else {
                continue;
            };
            let current = self.packages.find_version_by_tag(fullname, tag).await?;
            if current.as_deref() != Some(version) {
                self.packages.set_tag(fullname, tag, version).await?;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl TaskExecutor for PackageSyncer {
    fn task_type(&self) -> TaskType {
        TaskType::SyncPackage
    }

    async fn execute(&self, task: &mut Task) -> Result<(), SyncError> {
        let data: SyncPackageData = serde_json::from_value(task.data.clone())
            .map_err(|err| SyncError::invalid_data(err.to_string()))?;
        let lock_name = format!("{}:publish", task.target_name);
        let ran = self
            .lock
            .with_lock(&lock_name, PUBLISH_LOCK_TTL_SECS, || {
                self.sync_package(task, &data)
            })
            .await?;
        match ran {
            Some(result) => result,
            None => Err(SyncError::lock_held(lock_name)),
        }
    }
}
