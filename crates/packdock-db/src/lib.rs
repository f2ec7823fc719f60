//! SQLite repository implementations and the local-filesystem blob store.
//!
//! Everything behind the core ports: the task store (with its atomic
//! claim), mirrored binary records, proxy-cache records, the minimal
//! package store the sync engine publishes into, and a disk-backed
//! [`DistStore`](packdock_core::ports::DistStore).

mod dist_store;
mod repositories;
pub mod setup;

pub use dist_store::FsDistStore;
// Re-export so the composition root does not need its own sqlx dependency
pub use sqlx::SqlitePool;
pub use repositories::{
    SqliteBinaryRepository, SqlitePackageRepository, SqliteProxyCacheRepository,
    SqliteTaskRepository, SqliteVersionFileRepository,
};
