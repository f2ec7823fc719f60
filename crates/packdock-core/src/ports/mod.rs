//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the engine expects from infrastructure.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` or `reqwest` types in any signature
//! - Intent-based methods, not generic CRUD
//! - The task claim is the one operation that must be a true atomic
//!   read-modify-write in the implementation

mod binary_repository;
mod dist_store;
mod package_manager;
mod proxy_cache_repository;
mod task_repository;
mod version_files;

use thiserror::Error;

pub use binary_repository::{BinaryEntry, BinaryRepository};
pub use dist_store::DistStore;
pub use package_manager::{PackageManager, PackageSummary, PublishOutcome, PublishVersionCmd};
pub use proxy_cache_repository::{ProxyCacheEntry, ProxyCacheRepository, ProxyFileType};
pub use task_repository::TaskRepository;
pub use version_files::{VersionFileRecord, VersionFileRepository};

/// Errors surfaced by repository and storage ports.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An entity with the same identifier already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Storage backend error (database, key-value store, filesystem).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    /// Create a storage error from any displayable backend error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}
