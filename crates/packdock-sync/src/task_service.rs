//! Task lifecycle service.
//!
//! Creation (with target-exclusive dedup), claiming (with abandoned-task
//! reclaim), finishing (with the retry ceiling), and the append-only
//! execution log.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use packdock_core::config::SyncConfig;
use packdock_core::ports::{DistStore, TaskRepository};
use packdock_core::task::{Task, TaskState, TaskType};

use crate::error::SyncError;

/// Owns every transition a task record goes through.
///
/// Executors and worker loops never mutate task state in the store
/// directly; they go through this service so the retry ceiling and the
/// archive step cannot be skipped.
pub struct TaskService {
    repo: Arc<dyn TaskRepository>,
    dist: Arc<dyn DistStore>,
    config: Arc<SyncConfig>,
}

impl TaskService {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        dist: Arc<dyn DistStore>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self { repo, dist, config }
    }

    /// Create a task, or return the existing active one when the family is
    /// target-exclusive.
    ///
    /// The dedup check happens at creation time; the advisory lock guards
    /// execution, not creation.
    pub async fn create_task(&self, task: Task) -> Result<Task, SyncError> {
        if task.task_type.is_target_exclusive() {
            if let Some(existing) = self
                .repo
                .find_active_task_for_target(task.task_type, &task.target_name)
                .await?
            {
                return Ok(existing);
            }
        }
        self.repo.insert_task(&task).await?;
        Ok(task)
    }

    /// Atomically claim the next runnable task of a family.
    ///
    /// A `processing` task whose last transition is older than the
    /// abandonment timeout counts as crashed and is claimed again.
    pub async fn find_execute_task(
        &self,
        task_type: TaskType,
    ) -> Result<Option<Task>, SyncError> {
        let abandoned_before = Utc::now()
            - chrono::Duration::from_std(self.config.task_abandoned_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        Ok(self
            .repo
            .claim_next_runnable(Some(task_type), abandoned_before)
            .await?)
    }

    /// Mark a task successful and archive it.
    pub async fn finish_success(&self, task: &mut Task) -> Result<(), SyncError> {
        task.state = TaskState::Success;
        task.updated_at = Utc::now();
        task.log_store_position = "history".to_string();
        self.repo.update_task(task).await?;
        self.repo.archive_task(task).await?;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Retryable failures re-queue the task while it is below the attempt
    /// ceiling; everything else (or an exhausted ceiling) fails it
    /// permanently and archives it.
    pub async fn finish_failure(
        &self,
        task: &mut Task,
        error: &SyncError,
    ) -> Result<(), SyncError> {
        task.error = error.to_string();
        task.updated_at = Utc::now();
        if error.is_retryable() && task.should_retry(self.config.task_max_attempts) {
            task.state = TaskState::Waiting;
            self.repo.update_task(task).await?;
            self.append_task_log(
                task,
                &format!(
                    "attempt {} failed: {}, will retry",
                    task.attempts, task.error
                ),
            )
            .await;
        } else {
            task.state = TaskState::Fail;
            task.log_store_position = "history".to_string();
            self.repo.update_task(task).await?;
            self.append_task_log(
                task,
                &format!("attempt {} failed permanently: {}", task.attempts, task.error),
            )
            .await;
            self.repo.archive_task(task).await?;
        }
        Ok(())
    }

    /// Append one line to the task's execution log. Best effort: a log
    /// store hiccup must not fail the task itself.
    pub async fn append_task_log(&self, task: &Task, line: &str) {
        let stamped = format!("[{}] {line}\n", Utc::now().to_rfc3339());
        if let Err(err) = self.dist.append_text(&task.log_path, &stamped).await {
            warn!(
                "[TaskService.appendTaskLog:error] taskId: {}, logPath: {}, error: {err}",
                task.task_id, task.log_path
            );
        }
    }

    /// Read back a task's execution log.
    pub async fn read_task_log(&self, task: &Task) -> Result<Option<String>, SyncError> {
        Ok(self.dist.read_text(&task.log_path).await?)
    }

    /// Find a task by id, looking in the active store first, then history.
    pub async fn find_task(&self, task_id: &str) -> Result<Option<Task>, SyncError> {
        if let Some(task) = self.repo.find_task(task_id).await? {
            return Ok(Some(task));
        }
        Ok(self.repo.find_history_task(task_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDistStore, MemoryTaskRepository, test_config};

    fn service(repo: Arc<MemoryTaskRepository>, dist: Arc<MemoryDistStore>) -> TaskService {
        TaskService::new(repo, dist, Arc::new(test_config()))
    }

    fn sync_task(target: &str) -> Task {
        Task::new(TaskType::SyncPackage, target, serde_json::json!({}))
    }

    #[tokio::test]
    async fn exclusive_targets_return_the_existing_active_task() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let service = service(Arc::clone(&repo), Arc::new(MemoryDistStore::new()));

        let first = service.create_task(sync_task("lodash")).await.unwrap();
        let second = service.create_task(sync_task("lodash")).await.unwrap();
        assert_eq!(second.task_id, first.task_id, "no duplicate active task");
        assert_eq!(repo.active_count(), 1);

        // a different target gets its own task
        let other = service.create_task(sync_task("react")).await.unwrap();
        assert_ne!(other.task_id, first.task_id);
    }

    #[tokio::test]
    async fn hook_tasks_may_pile_up_per_target() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let service = service(Arc::clone(&repo), Arc::new(MemoryDistStore::new()));

        let data = serde_json::json!({"endpoint": "https://example.com/hook"});
        let first = service
            .create_task(Task::new(TaskType::TriggerHook, "lodash", data.clone()))
            .await
            .unwrap();
        let second = service
            .create_task(Task::new(TaskType::TriggerHook, "lodash", data))
            .await
            .unwrap();
        assert_ne!(first.task_id, second.task_id);
        assert_eq!(repo.active_count(), 2);
    }

    #[tokio::test]
    async fn claim_transitions_and_counts_the_attempt() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let service = service(Arc::clone(&repo), Arc::new(MemoryDistStore::new()));
        service.create_task(sync_task("lodash")).await.unwrap();

        let claimed = service
            .find_execute_task(TaskType::SyncPackage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.state, TaskState::Processing);
        assert_eq!(claimed.attempts, 1);

        // nothing else runnable; the processing task is not stale yet
        assert!(
            service
                .find_execute_task(TaskType::SyncPackage)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn claim_filters_by_family() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let service = service(Arc::clone(&repo), Arc::new(MemoryDistStore::new()));
        service.create_task(sync_task("lodash")).await.unwrap();

        assert!(
            service
                .find_execute_task(TaskType::SyncBinary)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn abandoned_tasks_are_reclaimed() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let service = service(Arc::clone(&repo), Arc::new(MemoryDistStore::new()));
        service.create_task(sync_task("lodash")).await.unwrap();

        let claimed = service
            .find_execute_task(TaskType::SyncPackage)
            .await
            .unwrap()
            .unwrap();
        // simulate the holder crashing long ago
        repo.age_task(&claimed.task_id, chrono::Duration::seconds(600));

        let reclaimed = service
            .find_execute_task(TaskType::SyncPackage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.task_id, claimed.task_id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn success_archives_the_task() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let service = service(Arc::clone(&repo), Arc::new(MemoryDistStore::new()));
        service.create_task(sync_task("lodash")).await.unwrap();
        let mut task = service
            .find_execute_task(TaskType::SyncPackage)
            .await
            .unwrap()
            .unwrap();

        service.finish_success(&mut task).await.unwrap();
        assert_eq!(repo.active_count(), 0);
        let archived = service.find_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(archived.state, TaskState::Success);
    }

    #[tokio::test]
    async fn retryable_failures_requeue_until_the_ceiling() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let dist = Arc::new(MemoryDistStore::new());
        let service = service(Arc::clone(&repo), Arc::clone(&dist));
        service.create_task(sync_task("lodash")).await.unwrap();

        let err = SyncError::upstream(503, "https://r.example.com/lodash");
        // attempts 1 and 2 re-queue
        for expected_attempt in 1..=2 {
            let mut task = service
                .find_execute_task(TaskType::SyncPackage)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(task.attempts, expected_attempt);
            service.finish_failure(&mut task, &err).await.unwrap();
            assert_eq!(task.state, TaskState::Waiting);
        }

        // attempt 3 hits the ceiling and fails permanently
        let mut task = service
            .find_execute_task(TaskType::SyncPackage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.attempts, 3);
        service.finish_failure(&mut task, &err).await.unwrap();
        assert_eq!(task.state, TaskState::Fail);
        assert_eq!(repo.active_count(), 0);

        // never re-enters waiting after the permanent fail
        assert!(
            service
                .find_execute_task(TaskType::SyncPackage)
                .await
                .unwrap()
                .is_none()
        );
        let archived = service.find_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(archived.state, TaskState::Fail);
        assert!(archived.error.contains("503"));
    }

    #[tokio::test]
    async fn permanent_failures_skip_the_retry_loop() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let service = service(Arc::clone(&repo), Arc::new(MemoryDistStore::new()));
        service.create_task(sync_task("gone")).await.unwrap();
        let mut task = service
            .find_execute_task(TaskType::SyncPackage)
            .await
            .unwrap()
            .unwrap();

        service
            .finish_failure(&mut task, &SyncError::not_found("gone"))
            .await
            .unwrap();
        assert_eq!(task.state, TaskState::Fail);
        assert_eq!(task.attempts, 1);
        assert_eq!(repo.active_count(), 0);
    }

    #[tokio::test]
    async fn execution_log_is_appended_and_readable() {
        let repo = Arc::new(MemoryTaskRepository::new());
        let dist = Arc::new(MemoryDistStore::new());
        let service = service(repo, Arc::clone(&dist));
        let task = service.create_task(sync_task("lodash")).await.unwrap();

        service.append_task_log(&task, "syncing from upstream").await;
        service.append_task_log(&task, "done, 2 versions").await;

        let log = service.read_task_log(&task).await.unwrap().unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("syncing from upstream"));
        assert!(lines[1].contains("done, 2 versions"));
    }
}
