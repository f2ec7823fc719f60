//! In-memory ports for engine tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use packdock_core::config::{SyncConfig, SyncMode};
use packdock_core::ports::{
    BinaryEntry, BinaryRepository, DistStore, PackageManager, PackageSummary, ProxyCacheEntry,
    ProxyCacheRepository, ProxyFileType, PublishOutcome, PublishVersionCmd, RepositoryError,
    TaskRepository, VersionFileRecord, VersionFileRepository,
};
use packdock_core::task::{Task, TaskState, TaskType};
use packdock_sources::{BinarySource, FetchResult, SourceError, SourceItem};

/// A config with every family switched on and test-friendly defaults.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        sync_mode: SyncMode::All,
        enable_sync_binary: true,
        hook_enable: true,
        enable_file_sync: true,
        ..SyncConfig::default()
    }
}

// ============================================================================
// Task repository
// ============================================================================

#[derive(Default)]
pub struct MemoryTaskRepository {
    tasks: Mutex<Vec<Task>>,
    history: Mutex<Vec<Task>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task directly, bypassing the service.
    pub fn seed(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }

    pub fn active_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn history_states(&self) -> Vec<TaskState> {
        self.history.lock().unwrap().iter().map(|t| t.state).collect()
    }

    /// Backdate a task's `updated_at`, simulating a crashed holder.
    pub fn age_task(&self, task_id: &str, by: chrono::Duration) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.task_id == task_id) {
            task.updated_at -= by;
        }
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn insert_task(&self, task: &Task) -> Result<(), RepositoryError> {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn find_task(&self, task_id: &str) -> Result<Option<Task>, RepositoryError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.task_id == task_id)
            .cloned())
    }

    async fn find_history_task(&self, task_id: &str) -> Result<Option<Task>, RepositoryError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.task_id == task_id)
            .cloned())
    }

    async fn find_active_task_for_target(
        &self,
        task_type: TaskType,
        target_name: &str,
    ) -> Result<Option<Task>, RepositoryError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.task_type == task_type && t.target_name == target_name && t.is_active())
            .cloned())
    }

    async fn claim_next_runnable(
        &self,
        task_type: Option<TaskType>,
        abandoned_before: DateTime<Utc>,
    ) -> Result<Option<Task>, RepositoryError> {
        let mut tasks = self.tasks.lock().unwrap();
        let claimed = tasks
            .iter_mut()
            .filter(|t| task_type.is_none_or(|tt| t.task_type == tt))
            .filter(|t| t.state == TaskState::Waiting || t.is_abandoned(abandoned_before))
            .min_by_key(|t| t.updated_at);
        Ok(claimed.map(|task| {
            task.start_processing();
            task.clone()
        }))
    }

    async fn update_task(&self, task: &Task) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.iter_mut().find(|t| t.task_id == task.task_id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(task.task_id.clone())),
        }
    }

    async fn archive_task(&self, task: &Task) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|t| t.task_id != task.task_id);
        self.history.lock().unwrap().push(task.clone());
        Ok(())
    }
}

// ============================================================================
// Dist store
// ============================================================================

#[derive(Default)]
pub struct MemoryDistStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryDistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn contents(&self, dist_path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(dist_path).cloned()
    }

    /// Preload content, e.g. a tarball for the file sync tests.
    pub fn preload(&self, dist_path: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(dist_path.to_string(), bytes);
    }
}

#[async_trait]
impl DistStore for MemoryDistStore {
    async fn save_file(&self, dist_path: &str, local_path: &Path) -> Result<(), RepositoryError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(RepositoryError::storage)?;
        self.files.lock().unwrap().insert(dist_path.to_string(), bytes);
        Ok(())
    }

    async fn download_to_file(
        &self,
        dist_path: &str,
        local_path: &Path,
    ) -> Result<(), RepositoryError> {
        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(dist_path)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(dist_path.to_string()))?;
        tokio::fs::write(local_path, bytes)
            .await
            .map_err(RepositoryError::storage)
    }

    async fn append_text(&self, dist_path: &str, content: &str) -> Result<(), RepositoryError> {
        self.files
            .lock()
            .unwrap()
            .entry(dist_path.to_string())
            .or_default()
            .extend_from_slice(content.as_bytes());
        Ok(())
    }

    async fn read_text(&self, dist_path: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(dist_path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
    }
}

// ============================================================================
// Binary repository
// ============================================================================

#[derive(Default)]
pub struct MemoryBinaryRepository {
    entries: Mutex<Vec<BinaryEntry>>,
}

impl MemoryBinaryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl BinaryRepository for MemoryBinaryRepository {
    async fn find_binary(
        &self,
        category: &str,
        parent: &str,
        name: &str,
    ) -> Result<Option<BinaryEntry>, RepositoryError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.category == category && e.parent == parent && e.name == name)
            .cloned())
    }

    async fn list_binaries(
        &self,
        category: &str,
        parent: &str,
    ) -> Result<Vec<BinaryEntry>, RepositoryError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.category == category && e.parent == parent)
            .cloned()
            .collect())
    }

    async fn save_binary(&self, entry: &BinaryEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| {
            e.category == entry.category && e.parent == entry.parent && e.name == entry.name
        }) {
            Some(stored) => {
                stored.size = entry.size;
                stored.date = entry.date.clone();
                stored.updated_at = Utc::now();
            }
            None => entries.push(entry.clone()),
        }
        Ok(())
    }
}

// ============================================================================
// Package manager
// ============================================================================

#[derive(Default)]
pub struct MemoryPackageManager {
    versions: Mutex<HashMap<String, Vec<String>>>,
    tags: Mutex<HashMap<String, String>>,
}

impl MemoryPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark versions as already published.
    pub fn preload(&self, fullname: &str, versions: &[&str]) {
        self.versions.lock().unwrap().insert(
            fullname.to_string(),
            versions.iter().map(ToString::to_string).collect(),
        );
    }

    pub fn published_versions(&self, fullname: &str) -> Vec<String> {
        self.versions
            .lock()
            .unwrap()
            .get(fullname)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tag(&self, fullname: &str, tag: &str) -> Option<String> {
        self.tags.lock().unwrap().get(&format!("{fullname}:{tag}")).cloned()
    }
}

#[async_trait]
impl PackageManager for MemoryPackageManager {
    async fn find_package(
        &self,
        fullname: &str,
    ) -> Result<Option<PackageSummary>, RepositoryError> {
        Ok(self.versions.lock().unwrap().get(fullname).map(|_| {
            let (scope, name) = fullname
                .strip_prefix('@')
                .and_then(|rest| rest.split_once('/'))
                .map_or(("", fullname), |(scope, name)| (scope, name));
            PackageSummary {
                package_id: format!("pkg-{fullname}"),
                scope: scope.to_string(),
                name: name.to_string(),
                fullname: fullname.to_string(),
            }
        }))
    }

    async fn list_published_versions(
        &self,
        fullname: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        Ok(self.published_versions(fullname))
    }

    async fn publish_version(
        &self,
        cmd: &PublishVersionCmd,
    ) -> Result<PublishOutcome, RepositoryError> {
        let mut versions = self.versions.lock().unwrap();
        let list = versions.entry(cmd.fullname.clone()).or_default();
        if list.contains(&cmd.version) {
            return Ok(PublishOutcome::AlreadyExists);
        }
        list.push(cmd.version.clone());
        Ok(PublishOutcome::Published {
            package_version_id: format!("{}@{}", cmd.fullname, cmd.version),
            tar_dist_path: format!("/packages/{}/{}/tar.tgz", cmd.fullname, cmd.version),
        })
    }

    async fn find_version_by_tag(
        &self,
        fullname: &str,
        tag: &str,
    ) -> Result<Option<String>, RepositoryError> {
        Ok(self.tag(fullname, tag))
    }

    async fn set_tag(
        &self,
        fullname: &str,
        tag: &str,
        version: &str,
    ) -> Result<(), RepositoryError> {
        self.tags
            .lock()
            .unwrap()
            .insert(format!("{fullname}:{tag}"), version.to_string());
        Ok(())
    }
}

// ============================================================================
// Proxy cache repository
// ============================================================================

#[derive(Default)]
pub struct MemoryProxyCacheRepository {
    entries: Mutex<Vec<ProxyCacheEntry>>,
}

impl MemoryProxyCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, fullname: &str, file_type: ProxyFileType) {
        self.entries.lock().unwrap().push(ProxyCacheEntry {
            fullname: fullname.to_string(),
            file_type,
            file_path: String::new(),
            updated_at: Utc::now(),
        });
    }

    pub fn entry(&self, fullname: &str, file_type: &ProxyFileType) -> Option<ProxyCacheEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.fullname == fullname && &e.file_type == file_type)
            .cloned()
    }
}

#[async_trait]
impl ProxyCacheRepository for MemoryProxyCacheRepository {
    async fn list_cached_files(
        &self,
        page_size: usize,
        page_index: usize,
    ) -> Result<Vec<ProxyCacheEntry>, RepositoryError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .skip(page_index * page_size)
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn list_cached_files_for_package(
        &self,
        fullname: &str,
    ) -> Result<Vec<ProxyCacheEntry>, RepositoryError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.fullname == fullname)
            .cloned()
            .collect())
    }

    async fn save_cached_file(&self, entry: &ProxyCacheEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.lock().unwrap();
        match entries
            .iter_mut()
            .find(|e| e.fullname == entry.fullname && e.file_type == entry.file_type)
        {
            Some(stored) => *stored = entry.clone(),
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn remove_cached_file(
        &self,
        fullname: &str,
        file_type: &ProxyFileType,
    ) -> Result<(), RepositoryError> {
        self.entries
            .lock()
            .unwrap()
            .retain(|e| !(e.fullname == fullname && &e.file_type == file_type));
        Ok(())
    }
}

// ============================================================================
// Version file repository
// ============================================================================

#[derive(Default)]
pub struct MemoryVersionFileRepository {
    records: Mutex<Vec<VersionFileRecord>>,
}

impl MemoryVersionFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl VersionFileRepository for MemoryVersionFileRepository {
    async fn has_files(&self, package_version_id: &str) -> Result<bool, RepositoryError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.package_version_id == package_version_id))
    }

    async fn find_file(
        &self,
        package_version_id: &str,
        directory: &str,
        name: &str,
    ) -> Result<Option<VersionFileRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| {
                r.package_version_id == package_version_id
                    && r.directory == directory
                    && r.name == name
            })
            .cloned())
    }

    async fn create_file(&self, record: &VersionFileRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().unwrap();
        let duplicate = records.iter().any(|r| {
            r.package_version_id == record.package_version_id
                && r.directory == record.directory
                && r.name == record.name
        });
        if duplicate {
            return Err(RepositoryError::AlreadyExists(format!(
                "{}:{}{}",
                record.package_version_id, record.directory, record.name
            )));
        }
        records.push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Binary source
// ============================================================================

/// A scripted binary source over a fixed directory tree.
pub struct FakeSource {
    name: String,
    tree: HashMap<String, Vec<SourceItem>>,
    init_calls: AtomicUsize,
    finish_calls: Mutex<Vec<bool>>,
    fail_dirs: Vec<String>,
}

impl FakeSource {
    pub fn new(name: &str, tree: HashMap<String, Vec<SourceItem>>) -> Self {
        Self {
            name: name.to_string(),
            tree,
            init_calls: AtomicUsize::new(0),
            finish_calls: Mutex::new(Vec::new()),
            fail_dirs: Vec::new(),
        }
    }

    /// Make `fetch` on these directories fail with an upstream error.
    #[must_use]
    pub fn with_failing_dirs(mut self, dirs: &[&str]) -> Self {
        self.fail_dirs = dirs.iter().map(ToString::to_string).collect();
        self
    }

    pub fn init_count(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn finish_calls(&self) -> Vec<bool> {
        self.finish_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BinarySource for FakeSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn init_fetch(&self) -> Result<(), SourceError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(
        &self,
        dir: &str,
        _cursor: Option<&serde_json::Value>,
    ) -> Result<Option<FetchResult>, SourceError> {
        if self.fail_dirs.iter().any(|d| d == dir) {
            return Err(SourceError::Status {
                status: 500,
                url: format!("fake://{}{dir}", self.name),
            });
        }
        Ok(Some(FetchResult::finished(
            self.tree.get(dir).cloned().unwrap_or_default(),
        )))
    }

    async fn finish_fetch(&self, success: bool) -> Result<(), SourceError> {
        self.finish_calls.lock().unwrap().push(success);
        Ok(())
    }
}
