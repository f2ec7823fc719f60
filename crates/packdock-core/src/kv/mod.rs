//! Shared key-value store abstraction.
//!
//! This is the substrate for the advisory [`LockManager`](crate::lock::LockManager)
//! and mirrors the small Redis surface the engine needs. The store is
//! assumed single-node-consistent; no partition tolerance is designed for.

mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryKvStore;

use crate::ports::RepositoryError;

/// Port for the shared key-value store.
///
/// [`set_nx`](Self::set_nx) must be a genuine atomic set-if-absent: the
/// check and the insert happen under one critical section in the backend,
/// never as two client round trips.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError>;

    /// Write a value with a time-to-live.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), RepositoryError>;

    /// Delete a key. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), RepositoryError>;

    /// Atomically set a value only if the key is absent; returns whether
    /// the write happened.
    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, RepositoryError>;

    /// Set or refresh the time-to-live of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RepositoryError>;
}
