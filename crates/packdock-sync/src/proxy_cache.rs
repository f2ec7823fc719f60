//! Proxy-cache refresh executor and sweep.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

use packdock_core::ports::{DistStore, ProxyCacheEntry, ProxyCacheRepository, ProxyFileType};
use packdock_core::task::{Task, TaskType, UpdateProxyCacheData};
use packdock_sources::{RegistryClient, SourceError};

use crate::error::SyncError;
use crate::task_service::TaskService;
use crate::worker::TaskExecutor;

const SWEEP_PAGE_SIZE: usize = 5;

/// Keeps cached upstream files fresh in proxy mode.
///
/// Only package-level manifests go stale; the daily sweep enqueues one
/// refresh task per cached manifest, and a refreshed package manifest fans
/// out refresh tasks for that package's cached version manifests (another
/// task's side effect creating tasks).
pub struct ProxyCacheService {
    registry: Arc<RegistryClient>,
    cache: Arc<dyn ProxyCacheRepository>,
    dist: Arc<dyn DistStore>,
    task_service: Arc<TaskService>,
}

impl ProxyCacheService {
    pub fn new(
        registry: Arc<RegistryClient>,
        cache: Arc<dyn ProxyCacheRepository>,
        dist: Arc<dyn DistStore>,
        task_service: Arc<TaskService>,
    ) -> Self {
        Self {
            registry,
            cache,
            dist,
            task_service,
        }
    }

    /// Create (or return the active) refresh task for one cached file.
    pub async fn create_refresh_task(
        &self,
        fullname: &str,
        file_type: &ProxyFileType,
    ) -> Result<Task, SyncError> {
        let data = UpdateProxyCacheData {
            fullname: fullname.to_string(),
            file_type: file_type.file_name(),
        };
        let task = Task::new(
            TaskType::UpdateProxyCache,
            format!("{fullname}/{}", file_type.file_name()),
            serde_json::to_value(data).map_err(|err| SyncError::invalid_data(err.to_string()))?,
        );
        self.task_service.create_task(task).await
    }

    /// The cron sweep: page through every cached file and enqueue refresh
    /// tasks for the package manifests. One broken record must not stop
    /// the sweep.
    pub async fn enqueue_refresh_tasks(&self) -> Result<usize, SyncError> {
        let mut page_index = 0usize;
        let mut created = 0usize;
        loop {
            let page = self
                .cache
                .list_cached_files(SWEEP_PAGE_SIZE, page_index)
                .await?;
            if page.is_empty() {
                break;
            }
            for entry in &page {
                if !entry.file_type.is_package_manifest() {
                    continue;
                }
                match self
                    .create_refresh_task(&entry.fullname, &entry.file_type)
                    .await
                {
                    Ok(task) => {
                        created += 1;
                        info!(
                            "[ProxyCacheService.enqueueRefreshTasks:createTask][{page_index}] taskId: {}, targetName: {}",
                            task.task_id, task.target_name
                        );
                    }
                    Err(err) => {
                        error!(
                            "[ProxyCacheService.enqueueRefreshTasks:error][{page_index}] fullname: {}, error: {err}",
                            entry.fullname
                        );
                    }
                }
            }
            page_index += 1;
        }
        Ok(created)
    }

    async fn refresh_file(
        &self,
        task: &Task,
        fullname: &str,
        file_type: &ProxyFileType,
    ) -> Result<(), SyncError> {
        let manifest = match self.registry.get_full_manifest(fullname).await {
            Ok(manifest) => manifest,
            Err(SourceError::NotFound { .. }) => {
                // the upstream package is gone; drop the stale cache entry
                self.cache.remove_cached_file(fullname, file_type).await?;
                self.task_service
                    .append_task_log(
                        task,
                        &format!("'{fullname}' is gone upstream, cache entry dropped"),
                    )
                    .await;
                return Err(SyncError::not_found(fullname));
            }
            Err(err) => return Err(err.into()),
        };

        let content = match file_type {
            ProxyFileType::FullManifest => manifest.clone(),
            ProxyFileType::AbbreviatedManifest => abbreviate_manifest(&manifest),
            ProxyFileType::VersionManifest(version) => {
                let version_manifest = &manifest["versions"][version.as_str()];
                if version_manifest.is_null() {
                    return Err(SyncError::not_found(format!("{fullname}@{version}")));
                }
                version_manifest.clone()
            }
        };

        let file_path = format!("/proxy/{fullname}/{}", file_type.file_name());
        let scratch = tempfile::tempdir()?;
        let local = scratch.path().join("manifest.json");
        let bytes =
            serde_json::to_vec(&content).map_err(|err| SyncError::invalid_data(err.to_string()))?;
        tokio::fs::write(&local, bytes).await?;
        self.dist.save_file(&file_path, &local).await?;
        self.cache
            .save_cached_file(&ProxyCacheEntry {
                fullname: fullname.to_string(),
                file_type: file_type.clone(),
                file_path: file_path.clone(),
                updated_at: Utc::now(),
            })
            .await?;
        self.task_service
            .append_task_log(task, &format!("refreshed {file_path}"))
            .await;

        if file_type.is_package_manifest() {
            self.fan_out_version_refreshes(task, fullname).await?;
        }
        Ok(())
    }

    /// A refreshed package manifest re-syncs the package's cached
    /// version manifests too.
    async fn fan_out_version_refreshes(
        &self,
        task: &Task,
        fullname: &str,
    ) -> Result<(), SyncError> {
        let cached = self.cache.list_cached_files_for_package(fullname).await?;
        for entry in cached {
            if entry.file_type.is_package_manifest() {
                continue;
            }
            let spawned = self
                .create_refresh_task(&entry.fullname, &entry.file_type)
                .await?;
            self.task_service
                .append_task_log(
                    task,
                    &format!("enqueued refresh of {}, taskId: {}", spawned.target_name, spawned.task_id),
                )
                .await;
        }
        Ok(())
    }
}

/// The install-time manifest: the full document minus the human-only bulk.
fn abbreviate_manifest(manifest: &serde_json::Value) -> serde_json::Value {
    let mut abbreviated = manifest.clone();
    if let Some(map) = abbreviated.as_object_mut() {
        map.remove("readme");
        map.remove("description");
        if let Some(versions) = map.get_mut("versions").and_then(|v| v.as_object_mut()) {
            for version in versions.values_mut() {
                if let Some(version) = version.as_object_mut() {
                    version.remove("readme");
                    version.remove("description");
                }
            }
        }
    }
    abbreviated
}

#[async_trait]
impl TaskExecutor for ProxyCacheService {
    fn task_type(&self) -> TaskType {
        TaskType::UpdateProxyCache
    }

    async fn execute(&self, task: &mut Task) -> Result<(), SyncError> {
        let data: UpdateProxyCacheData = serde_json::from_value(task.data.clone())
            .map_err(|err| SyncError::invalid_data(err.to_string()))?;
        let file_type = ProxyFileType::from_str(&data.file_type)
            .map_err(SyncError::invalid_data)?;
        self.refresh_file(task, &data.fullname, &file_type).await
    }
}
