//! Binary mirror sync executor.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use packdock_core::config::SyncConfig;
use packdock_core::lock::LockManager;
use packdock_core::ports::{BinaryEntry, BinaryRepository, DistStore};
use packdock_core::task::{Task, TaskType};
use packdock_sources::{BinarySource, HttpBackend, SourceItem, SourceRegistry};

use crate::error::SyncError;
use crate::task_service::TaskService;
use crate::worker::TaskExecutor;

/// Large archives need minutes, not the metadata budget.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

const SYNC_LOCK_TTL_SECS: u64 = 3600;

/// Mirrors one binary source's directory tree.
///
/// The traversal is `init_fetch` once, a cursor-looped `fetch` per
/// directory with recursion into subdirectories, then `finish_fetch`
/// exactly once with the overall outcome. Discovered items are diffed
/// against the recorded entries by `(parent, name)`; only unseen or
/// re-dated files are downloaded.
pub struct BinarySyncer {
    sources: Arc<SourceRegistry>,
    binaries: Arc<dyn BinaryRepository>,
    dist: Arc<dyn DistStore>,
    backend: Arc<dyn HttpBackend>,
    lock: Arc<LockManager>,
    task_service: Arc<TaskService>,
    config: Arc<SyncConfig>,
}

impl BinarySyncer {
    pub fn new(
        sources: Arc<SourceRegistry>,
        binaries: Arc<dyn BinaryRepository>,
        dist: Arc<dyn DistStore>,
        backend: Arc<dyn HttpBackend>,
        lock: Arc<LockManager>,
        task_service: Arc<TaskService>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            sources,
            binaries,
            dist,
            backend,
            lock,
            task_service,
            config,
        }
    }

    async fn sync_source(
        &self,
        task: &Task,
        source: &Arc<dyn BinarySource>,
    ) -> Result<usize, SyncError> {
        let result = self.traverse(task, source).await;
        // cleanup runs exactly once, also after a partial failure
        if let Err(err) = source.finish_fetch(result.is_ok()).await {
            warn!(
                "[BinarySyncer.executeTask:finishFetch:error] targetName: {}, error: {err}",
                task.target_name
            );
        }
        result
    }

    async fn traverse(
        &self,
        task: &Task,
        source: &Arc<dyn BinarySource>,
    ) -> Result<usize, SyncError> {
        source.init_fetch().await?;
        let scratch = tempfile::tempdir()?;
        self.sync_dir(task, source, "/", scratch.path()).await
    }

    /// Drain one directory's cursor chain into a single item list.
    async fn fetch_dir(
        &self,
        source: &Arc<dyn BinarySource>,
        dir: &str,
    ) -> Result<Vec<SourceItem>, SyncError> {
        let mut items = Vec::new();
        let mut cursor: Option<serde_json::Value> = None;
        loop {
            let Some(result) = source.fetch(dir, cursor.as_ref()).await? else {
                break;
            };
            items.extend(result.items);
            match result.next_cursor {
                Some(next) if !next.is_null() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(items)
    }

    /// Recursively mirror one directory; returns how many files were
    /// downloaded.
    fn sync_dir<'a>(
        &'a self,
        task: &'a Task,
        source: &'a Arc<dyn BinarySource>,
        dir: &'a str,
        scratch: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<usize, SyncError>> + Send + 'a>> {
        Box::pin(async move {
            let category = &task.target_name;
            let items = self.fetch_dir(source, dir).await?;
            let existing: HashMap<String, BinaryEntry> = self
                .binaries
                .list_binaries(category, dir)
                .await?
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect();

            let mut downloaded = 0;
            for item in items {
                let known = existing.get(&item.name);
                if known.is_some_and(|entry| entry.date == item.date) {
                    continue;
                }
                if item.is_dir {
                    let child = format!("{dir}{}", item.name);
                    downloaded += self.sync_dir(task, source, &child, scratch).await?;
                    // record the directory only after its children made it
                    self.save_entry(category, dir, &item, 0).await?;
                } else {
                    downloaded += usize::from(self.sync_file(task, dir, &item, scratch).await?);
                }
            }
            Ok(downloaded)
        })
    }

    /// Download one unseen file and record it; returns whether a download
    /// happened.
    async fn sync_file(
        &self,
        task: &Task,
        dir: &str,
        item: &SourceItem,
        scratch: &Path,
    ) -> Result<bool, SyncError> {
        let category = &task.target_name;
        let url = Url::parse(&item.url)
            .map_err(|err| SyncError::invalid_data(format!("bad item url '{}': {err}", item.url)))?;
        let local = scratch.join(format!("download-{}", item.name.replace('/', "_")));

        let status = self
            .backend
            .download_to_file(&url, &local, DOWNLOAD_TIMEOUT)
            .await?;
        if !(200..300).contains(&status) {
            let tolerated = item
                .ignore_download_statuses
                .as_ref()
                .is_some_and(|ignored| ignored.contains(&status));
            if tolerated {
                self.task_service
                    .append_task_log(
                        task,
                        &format!("skip download {url}, upstream answered tolerated {status}"),
                    )
                    .await;
                return Ok(false);
            }
            return Err(SyncError::upstream(status, url.as_str()));
        }

        let dist_path = format!("/binaries/{category}{dir}{}", item.name);
        self.dist.save_file(&dist_path, &local).await?;

        let size = match item.size.as_bytes() {
            Some(size) => size,
            None => tokio::fs::metadata(&local).await.map(|m| m.len()).unwrap_or(0),
        };
        self.save_entry(category, dir, item, size).await?;
        self.task_service
            .append_task_log(task, &format!("downloaded {url} => {dist_path}"))
            .await;
        Ok(true)
    }

    async fn save_entry(
        &self,
        category: &str,
        parent: &str,
        item: &SourceItem,
        size: u64,
    ) -> Result<(), SyncError> {
        let entry = BinaryEntry::new(category, parent, &item.name, item.is_dir, size, &item.date);
        self.binaries.save_binary(&entry).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for BinarySyncer {
    fn task_type(&self) -> TaskType {
        TaskType::SyncBinary
    }

    async fn execute(&self, task: &mut Task) -> Result<(), SyncError> {
        let name = task.target_name.clone();
        if !self.config.binary_sources.contains_key(&name) {
            return Err(SyncError::forbidden(format!(
                "'{name}' is not a configured binary source"
            )));
        }
        let Some(source) = self.sources.get(&name) else {
            return Err(SyncError::forbidden(format!(
                "no adapter resolved for binary source '{name}'"
            )));
        };

        let lock_name = format!("{name}:syncBinary");
        let ran = self
            .lock
            .with_lock(&lock_name, SYNC_LOCK_TTL_SECS, || {
                self.sync_source(task, &source)
            })
            .await?;
        let Some(result) = ran else {
            return Err(SyncError::lock_held(lock_name));
        };
        let downloaded = result?;
        self.task_service
            .append_task_log(task, &format!("mirrored {downloaded} new files for '{name}'"))
            .await;
        Ok(())
    }
}
