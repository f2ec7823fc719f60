//! SQLite task store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use packdock_core::ports::{RepositoryError, TaskRepository};
use packdock_core::task::{Task, TaskType};

use super::{is_unique_violation, storage_err};

const TASK_COLUMNS: &str = "task_id, type, state, target_name, author_id, author_ip, data, \
     log_path, log_store_position, attempts, error, created_at, updated_at";

/// Task store on SQLite.
///
/// The claim is one conditional `UPDATE ... RETURNING`: selection of the
/// oldest runnable task and its transition to `processing` happen in a
/// single statement, so two racing claimers can never both receive the
/// same task — SQLite serializes writers, and the `WHERE` re-check keeps a
/// second claimer from updating a row the first one just took.
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &SqliteRow) -> Result<Task, RepositoryError> {
    let task_type: String = row.try_get("type").map_err(storage_err)?;
    let state: String = row.try_get("state").map_err(storage_err)?;
    let data: String = row.try_get("data").map_err(storage_err)?;
    Ok(Task {
        task_id: row.try_get("task_id").map_err(storage_err)?,
        task_type: task_type
            .parse()
            .map_err(RepositoryError::Serialization)?,
        state: state.parse().map_err(RepositoryError::Serialization)?,
        target_name: row.try_get("target_name").map_err(storage_err)?,
        author_id: row.try_get("author_id").map_err(storage_err)?,
        author_ip: row.try_get("author_ip").map_err(storage_err)?,
        data: serde_json::from_str(&data)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?,
        log_path: row.try_get("log_path").map_err(storage_err)?,
        log_store_position: row.try_get("log_store_position").map_err(storage_err)?,
        attempts: row
            .try_get::<i64, _>("attempts")
            .map_err(storage_err)?
            .try_into()
            .unwrap_or(0),
        error: row.try_get("error").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert_task(&self, task: &Task) -> Result<(), RepositoryError> {
        let data = serde_json::to_string(&task.data)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let result = sqlx::query(
            "INSERT INTO tasks (task_id, type, state, target_name, author_id, author_ip, data, \
             log_path, log_store_position, attempts, error, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.task_id)
        .bind(task.task_type.as_str())
        .bind(task.state.as_str())
        .bind(&task.target_name)
        .bind(&task.author_id)
        .bind(&task.author_ip)
        .bind(data)
        .bind(&task.log_path)
        .bind(&task.log_store_position)
        .bind(i64::from(task.attempts))
        .bind(&task.error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(RepositoryError::AlreadyExists(task.task_id.clone()))
            }
            Err(err) => Err(storage_err(err)),
        }
    }

    async fn find_task(&self, task_id: &str) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn find_history_task(&self, task_id: &str) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM history_tasks WHERE task_id = ?"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn find_active_task_for_target(
        &self,
        task_type: TaskType,
        target_name: &str,
    ) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE type = ? AND target_name = ? AND state IN ('waiting', 'processing') \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(task_type.as_str())
        .bind(target_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn claim_next_runnable(
        &self,
        task_type: Option<TaskType>,
        abandoned_before: DateTime<Utc>,
    ) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE tasks SET state = 'processing', attempts = attempts + 1, updated_at = ?1 \
             WHERE task_id = ( \
                 SELECT task_id FROM tasks \
                 WHERE (?2 IS NULL OR type = ?2) \
                   AND (state = 'waiting' OR (state = 'processing' AND updated_at < ?3)) \
                 ORDER BY updated_at ASC LIMIT 1 \
             ) \
             AND (state = 'waiting' OR (state = 'processing' AND updated_at < ?3)) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(task_type.map(TaskType::as_str))
        .bind(abandoned_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn update_task(&self, task: &Task) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE tasks SET state = ?, attempts = ?, error = ?, log_store_position = ?, \
             updated_at = ? WHERE task_id = ?",
        )
        .bind(task.state.as_str())
        .bind(i64::from(task.attempts))
        .bind(&task.error)
        .bind(&task.log_store_position)
        .bind(task.updated_at)
        .bind(&task.task_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(task.task_id.clone()));
        }
        Ok(())
    }

    async fn archive_task(&self, task: &Task) -> Result<(), RepositoryError> {
        let data = serde_json::to_string(&task.data)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        // REPLACE keeps a re-archive after an at-least-once re-claim harmless
        sqlx::query(
            "INSERT OR REPLACE INTO history_tasks (task_id, type, state, target_name, \
             author_id, author_ip, data, log_path, log_store_position, attempts, error, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.task_id)
        .bind(task.task_type.as_str())
        .bind(task.state.as_str())
        .bind(&task.target_name)
        .bind(&task.author_id)
        .bind(&task.author_ip)
        .bind(data)
        .bind(&task.log_path)
        .bind(&task.log_store_position)
        .bind(i64::from(task.attempts))
        .bind(&task.error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        sqlx::query("DELETE FROM tasks WHERE task_id = ?")
            .bind(&task.task_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use packdock_core::task::TaskState;

    use super::*;
    use crate::test_util::test_pool;

    fn sync_task(target: &str) -> Task {
        Task::new(TaskType::SyncPackage, target, serde_json::json!({"tips": "test"}))
    }

    #[tokio::test]
    async fn insert_find_roundtrip() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteTaskRepository::new(pool);
        let task = sync_task("lodash").with_author("user-1", "127.0.0.1");
        repo.insert_task(&task).await.unwrap();

        let found = repo.find_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(found.target_name, "lodash");
        assert_eq!(found.author_id, "user-1");
        assert_eq!(found.data["tips"], "test");
        assert_eq!(found.state, TaskState::Waiting);

        // duplicate task ids are rejected by the store
        let err = repo.insert_task(&task).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn claim_is_fifo_and_counts_attempts() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteTaskRepository::new(pool);
        let mut first = sync_task("first");
        first.created_at -= chrono::Duration::seconds(10);
        first.updated_at -= chrono::Duration::seconds(10);
        repo.insert_task(&first).await.unwrap();
        repo.insert_task(&sync_task("second")).await.unwrap();

        let stale = Utc::now() - chrono::Duration::seconds(300);
        let claimed = repo
            .claim_next_runnable(Some(TaskType::SyncPackage), stale)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.target_name, "first", "oldest first");
        assert_eq!(claimed.state, TaskState::Processing);
        assert_eq!(claimed.attempts, 1);

        let second = repo
            .claim_next_runnable(Some(TaskType::SyncPackage), stale)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.target_name, "second");

        assert!(
            repo.claim_next_runnable(Some(TaskType::SyncPackage), stale)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn claim_filters_by_family() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteTaskRepository::new(pool);
        repo.insert_task(&sync_task("lodash")).await.unwrap();

        let stale = Utc::now() - chrono::Duration::seconds(300);
        assert!(
            repo.claim_next_runnable(Some(TaskType::SyncBinary), stale)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            repo.claim_next_runnable(None, stale)
                .await
                .unwrap()
                .is_some(),
            "no filter claims any family"
        );
    }

    #[tokio::test]
    async fn concurrent_claimers_each_get_a_distinct_task() {
        let (pool, _dir) = test_pool().await;
        let repo = Arc::new(SqliteTaskRepository::new(pool));
        for i in 0..3 {
            repo.insert_task(&sync_task(&format!("pkg-{i}"))).await.unwrap();
        }

        let stale = Utc::now() - chrono::Duration::seconds(300);
        let mut handles = Vec::new();
        for _ in 0..6 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.claim_next_runnable(Some(TaskType::SyncPackage), stale)
                    .await
                    .unwrap()
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(task) = handle.await.unwrap() {
                claimed.push(task);
            }
        }
        // exactly min(N claimers, M tasks) = 3 claims, all distinct
        assert_eq!(claimed.len(), 3);
        let ids: HashSet<String> = claimed.iter().map(|t| t.task_id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert!(claimed.iter().all(|t| t.attempts == 1));
    }

    #[tokio::test]
    async fn stale_processing_tasks_are_reclaimed() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteTaskRepository::new(pool);
        repo.insert_task(&sync_task("lodash")).await.unwrap();

        let stale = Utc::now() - chrono::Duration::seconds(300);
        let mut claimed = repo
            .claim_next_runnable(Some(TaskType::SyncPackage), stale)
            .await
            .unwrap()
            .unwrap();

        // fresh processing tasks are not claimable
        assert!(
            repo.claim_next_runnable(Some(TaskType::SyncPackage), stale)
                .await
                .unwrap()
                .is_none()
        );

        // backdate the holder's heartbeat past the abandonment timeout
        claimed.updated_at = Utc::now() - chrono::Duration::seconds(600);
        repo.update_task(&claimed).await.unwrap();

        let reclaimed = repo
            .claim_next_runnable(Some(TaskType::SyncPackage), stale)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.task_id, claimed.task_id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn archive_moves_the_row_to_history() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteTaskRepository::new(pool);
        let mut task = sync_task("lodash");
        repo.insert_task(&task).await.unwrap();

        task.state = TaskState::Success;
        repo.update_task(&task).await.unwrap();
        repo.archive_task(&task).await.unwrap();

        assert!(repo.find_task(&task.task_id).await.unwrap().is_none());
        let archived = repo.find_history_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(archived.state, TaskState::Success);

        // re-archiving after an at-least-once re-claim stays harmless
        repo.archive_task(&task).await.unwrap();
    }

    #[tokio::test]
    async fn active_lookup_sees_only_live_tasks() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteTaskRepository::new(pool);
        let mut task = sync_task("lodash");
        repo.insert_task(&task).await.unwrap();

        assert!(
            repo.find_active_task_for_target(TaskType::SyncPackage, "lodash")
                .await
                .unwrap()
                .is_some()
        );

        task.state = TaskState::Fail;
        repo.update_task(&task).await.unwrap();
        assert!(
            repo.find_active_task_for_target(TaskType::SyncPackage, "lodash")
                .await
                .unwrap()
                .is_none()
        );
    }
}
