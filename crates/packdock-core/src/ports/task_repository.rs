//! Task store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::RepositoryError;
use crate::task::{Task, TaskType};

/// Port for the persisted task store.
///
/// Active tasks live in one table; terminal tasks are moved to a historical
/// store of the same shape (queryable by task id), which keeps the active
/// table bounded.
///
/// # Claim atomicity
///
/// [`claim_next_runnable`](Self::claim_next_runnable) must be atomic with
/// respect to other processes: two claimers racing for the same task must
/// never both receive it. This is a conditional update in the store, not an
/// advisory lock — it has to survive a process crash without leaking
/// anything.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a new task.
    async fn insert_task(&self, task: &Task) -> Result<(), RepositoryError>;

    /// Look up an active task by id.
    async fn find_task(&self, task_id: &str) -> Result<Option<Task>, RepositoryError>;

    /// Look up an archived task by id.
    async fn find_history_task(&self, task_id: &str) -> Result<Option<Task>, RepositoryError>;

    /// Find the most recent waiting/processing task for a target.
    ///
    /// Used to enforce target exclusivity at creation time.
    async fn find_active_task_for_target(
        &self,
        task_type: TaskType,
        target_name: &str,
    ) -> Result<Option<Task>, RepositoryError>;

    /// Atomically claim the next runnable task and transition it to
    /// `Processing`, incrementing `attempts`.
    ///
    /// Runnable means `Waiting`, or `Processing` with `updated_at` older
    /// than `abandoned_before` (the original holder is presumed crashed).
    /// Claim order is oldest-first by `updated_at` within the family.
    async fn claim_next_runnable(
        &self,
        task_type: Option<TaskType>,
        abandoned_before: DateTime<Utc>,
    ) -> Result<Option<Task>, RepositoryError>;

    /// Persist updated task fields (state, error, timestamps).
    async fn update_task(&self, task: &Task) -> Result<(), RepositoryError>;

    /// Move a terminal task to the historical store and remove it from the
    /// active store.
    async fn archive_task(&self, task: &Task) -> Result<(), RepositoryError>;
}
