//! Core domain types and port definitions for packdock.
//!
//! This crate holds the task model, the advisory lock manager, the sync
//! configuration, and the trait abstractions (ports) that the engine expects
//! from infrastructure. It contains no HTTP, database, or filesystem code.

pub mod config;
pub mod kv;
pub mod lock;
pub mod ports;
pub mod task;

// Re-export commonly used types for convenience
pub use config::{BinarySourceConfig, ConfigError, SyncConfig, SyncMode};
pub use kv::{KvStore, MemoryKvStore};
pub use lock::LockManager;
pub use ports::{
    BinaryEntry, BinaryRepository, DistStore, PackageManager, PackageSummary, ProxyCacheEntry,
    ProxyCacheRepository, ProxyFileType, PublishOutcome, PublishVersionCmd, RepositoryError,
    TaskRepository, VersionFileRecord, VersionFileRepository,
};
pub use task::{
    SyncPackageData, Task, TaskState, TaskType, TriggerHookData, UpdateProxyCacheData,
};
