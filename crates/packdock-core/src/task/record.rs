//! The persisted task record.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{TaskState, TaskType};

/// A persisted unit of asynchronous work.
///
/// `target_name` is the logical subject the task operates on (a package
/// fullname, a binary source name, a cache file key). For target-exclusive
/// families, at most one task per target may be waiting or processing at a
/// time; the check happens at creation, not under the advisory lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique task id.
    pub task_id: String,

    /// Task family.
    pub task_type: TaskType,

    /// Lifecycle state.
    pub state: TaskState,

    /// Logical subject, used for idempotency and lock naming.
    pub target_name: String,

    /// Provenance: id of the user that triggered the task, if any.
    pub author_id: String,

    /// Provenance: ip the trigger came from, if any.
    pub author_ip: String,

    /// Family-specific payload.
    pub data: serde_json::Value,

    /// Append-only execution log reference in the blob store.
    pub log_path: String,

    /// Where the log is stored once the task is archived.
    pub log_store_position: String,

    /// Number of times the task entered `Processing`.
    pub attempts: u32,

    /// Last failure message, empty while none occurred.
    pub error: String,

    pub created_at: DateTime<Utc>,

    /// Last transition time; drives staleness detection for abandoned tasks.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new waiting task.
    pub fn new(task_type: TaskType, target_name: impl Into<String>, data: serde_json::Value) -> Self {
        let task_id = Uuid::new_v4().simple().to_string();
        let target_name = target_name.into();
        let now = Utc::now();
        let log_path = format!(
            "/packdock/task_log/{}/{:02}/{}-{}.log",
            now.year(),
            now.month(),
            task_type.as_str(),
            task_id
        );
        Self {
            task_id,
            task_type,
            state: TaskState::Waiting,
            target_name,
            author_id: String::new(),
            author_ip: String::new(),
            data,
            log_path,
            log_store_position: String::new(),
            attempts: 0,
            error: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach provenance.
    #[must_use]
    pub fn with_author(mut self, author_id: impl Into<String>, author_ip: impl Into<String>) -> Self {
        self.author_id = author_id.into();
        self.author_ip = author_ip.into();
        self
    }

    /// Whether the task is still active (claimable or running).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, TaskState::Waiting | TaskState::Processing)
    }

    /// Claim bookkeeping: transition to `Processing` and count the attempt.
    ///
    /// Repository implementations with an atomic claim perform the same
    /// mutation inside their conditional update; this method is the single
    /// source of truth for what that mutation is.
    pub fn start_processing(&mut self) {
        self.state = TaskState::Processing;
        self.attempts += 1;
        self.updated_at = Utc::now();
    }

    /// Whether a failed attempt may be re-queued.
    #[must_use]
    pub const fn should_retry(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }

    /// Whether a `Processing` task has been stuck past the abandonment
    /// timeout and is eligible for re-claim.
    #[must_use]
    pub fn is_abandoned(&self, abandoned_before: DateTime<Utc>) -> bool {
        self.state == TaskState::Processing && self.updated_at < abandoned_before
    }
}
