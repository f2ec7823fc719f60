//! SQLite repository implementations.

mod sqlite_binary_repository;
mod sqlite_package_repository;
mod sqlite_proxy_cache_repository;
mod sqlite_task_repository;

pub use sqlite_binary_repository::SqliteBinaryRepository;
pub use sqlite_package_repository::{SqlitePackageRepository, SqliteVersionFileRepository};
pub use sqlite_proxy_cache_repository::SqliteProxyCacheRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use packdock_core::ports::RepositoryError;

/// Map any sqlx error to the port error space.
pub(crate) fn storage_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(err.to_string())
}

/// Whether an insert bounced off a UNIQUE constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
