//! Persisted task model.
//!
//! A [`Task`] is a unit of asynchronous work with a state machine and retry
//! accounting. Tasks are created by external triggers (an HTTP request, a
//! cron tick, or another task's side effect), claimed by worker loops, and
//! moved to a historical store once they reach a terminal state.

mod payload;
mod record;
mod types;

pub use payload::{SyncPackageData, TriggerHookData, UpdateProxyCacheData};
pub use record::Task;
pub use types::{TaskState, TaskType};
