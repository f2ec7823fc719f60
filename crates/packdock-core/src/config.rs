//! Engine configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::TaskType;

/// How this instance synchronizes with the upstream registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// No package synchronization at all.
    #[default]
    None,
    /// Packages are synced into the local registry on demand.
    All,
    /// Upstream responses are cached and refreshed, not republished.
    Proxy,
}

/// One configured binary mirror source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinarySourceConfig {
    /// Adapter tag; resolved against the closed source-kind registry at
    /// startup (`dir_listing`, `json_index`, `paged_api`).
    pub kind: String,

    /// Upstream base URL the adapter fetches under.
    pub dist_url: String,

    /// Paths (relative to the source root) that are never mirrored.
    #[serde(default)]
    pub ignore_files: Vec<String>,

    /// Adapter-specific options, parsed by the adapter itself.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Validation errors for [`SyncConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("source_registry must not be empty")]
    EmptySourceRegistry,

    #[error("task_max_attempts must be at least 1")]
    ZeroMaxAttempts,

    #[error("concurrency ceiling for {family} must be at least 1")]
    ZeroCeiling { family: &'static str },

    #[error("binary source '{name}' has an empty dist_url")]
    EmptyDistUrl { name: String },
}

/// All knobs of the sync engine.
///
/// Ceilings are per process; with multiple peer processes the system-wide
/// concurrency for a family is `ceiling x process_count`, which is an
/// accepted trade-off, not a bug.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub sync_mode: SyncMode,

    /// Upstream registry base URL.
    pub source_registry: String,

    pub enable_sync_binary: bool,
    pub hook_enable: bool,

    /// Extract published tarballs into browsable per-file records.
    pub enable_file_sync: bool,

    pub sync_package_max_concurrency: usize,
    pub sync_binary_max_concurrency: usize,
    pub trigger_hook_max_concurrency: usize,
    pub update_proxy_cache_max_concurrency: usize,

    /// Attempts before a task fails permanently.
    pub task_max_attempts: u32,

    /// Staleness threshold after which a `processing` task counts as
    /// abandoned and becomes claimable again.
    #[serde(with = "duration_secs")]
    pub task_abandoned_timeout: Duration,

    /// Binary mirror sources, keyed by source name.
    #[serde(default)]
    pub binary_sources: HashMap<String, BinarySourceConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::None,
            source_registry: "https://registry.npmjs.org".to_string(),
            enable_sync_binary: false,
            hook_enable: false,
            enable_file_sync: false,
            sync_package_max_concurrency: 10,
            sync_binary_max_concurrency: 5,
            trigger_hook_max_concurrency: 10,
            update_proxy_cache_max_concurrency: 5,
            task_max_attempts: 3,
            task_abandoned_timeout: Duration::from_secs(300),
            binary_sources: HashMap::new(),
        }
    }
}

impl SyncConfig {
    /// Per-process concurrency ceiling of a task family.
    #[must_use]
    pub const fn worker_ceiling(&self, task_type: TaskType) -> usize {
        match task_type {
            TaskType::SyncPackage => self.sync_package_max_concurrency,
            TaskType::SyncBinary => self.sync_binary_max_concurrency,
            TaskType::TriggerHook => self.trigger_hook_max_concurrency,
            TaskType::UpdateProxyCache => self.update_proxy_cache_max_concurrency,
        }
    }

    /// Whether the worker loop of a task family should run at all.
    #[must_use]
    pub fn family_enabled(&self, task_type: TaskType) -> bool {
        match task_type {
            TaskType::SyncPackage => self.sync_mode != SyncMode::None,
            TaskType::SyncBinary => self.enable_sync_binary,
            TaskType::TriggerHook => self.hook_enable,
            TaskType::UpdateProxyCache => self.sync_mode == SyncMode::Proxy,
        }
    }

    /// Validate the configuration before wiring anything with it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_registry.trim().is_empty() {
            return Err(ConfigError::EmptySourceRegistry);
        }
        if self.task_max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        for (family, ceiling) in [
            ("sync_package", self.sync_package_max_concurrency),
            ("sync_binary", self.sync_binary_max_concurrency),
            ("trigger_hook", self.trigger_hook_max_concurrency),
            ("update_proxy_cache", self.update_proxy_cache_max_concurrency),
        ] {
            if ceiling == 0 {
                return Err(ConfigError::ZeroCeiling { family });
            }
        }
        for (name, source) in &self.binary_sources {
            if source.dist_url.trim().is_empty() {
                return Err(ConfigError::EmptyDistUrl { name: name.clone() });
            }
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
