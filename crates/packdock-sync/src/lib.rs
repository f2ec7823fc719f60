//! The packdock task engine.
//!
//! Worker loops claim persisted tasks and hand them to the executor of
//! their family: package sync, binary mirror sync, webhook delivery, and
//! proxy-cache refresh. Multiple peer processes run identical loops; all
//! cross-process coordination goes through the task store's atomic claim
//! and the advisory lock manager.

mod binary_syncer;
mod error;
mod file_sync;
mod hook_trigger;
mod package_syncer;
mod proxy_cache;
mod task_service;
mod worker;

pub use binary_syncer::BinarySyncer;
pub use error::SyncError;
pub use file_sync::FileSyncService;
pub use hook_trigger::HookTrigger;
pub use package_syncer::PackageSyncer;
pub use proxy_cache::ProxyCacheService;
pub use task_service::TaskService;
pub use worker::{TaskExecutor, WorkerLoop, WorkerOptions};

#[cfg(test)]
pub(crate) mod testing;
