//! The per-family worker loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use packdock_core::task::{Task, TaskType};

use crate::error::SyncError;
use crate::task_service::TaskService;

/// One executor per task family.
///
/// An executor consumes a claimed task and either returns `Ok(())` (the
/// worker marks it successful) or an error (the worker records it on the
/// task and applies the retry policy). Executors must tolerate running
/// twice for the same attempt: an abandoned-task reclaim means at-least-once
/// execution.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// The family this executor serves.
    fn task_type(&self) -> TaskType;

    /// Run one task to a terminal outcome.
    async fn execute(&self, task: &mut Task) -> Result<(), SyncError>;
}

/// Worker loop knobs.
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    /// Family label used in the stable log prefixes, e.g. `SyncPackageWorker`.
    pub name: &'static str,

    /// Whether this family is enabled at all; a disabled loop ticks as a
    /// no-op.
    pub enabled: bool,

    /// Per-process ceiling of concurrently draining ticks.
    pub ceiling: usize,

    /// Wall-clock interval between ticks.
    pub tick_interval: Duration,
}

/// A recurring poller that claims and drains runnable tasks of one family.
///
/// Each tick takes one permit from a bounded semaphore (the per-process
/// ceiling) and drains tasks serially until none remain or every permit is
/// taken by overlapping ticks. A failing executor is recorded on its task
/// and ends the drain; it never crashes the loop. With several peer
/// processes the system-wide concurrency is `ceiling x process_count`.
pub struct WorkerLoop {
    options: WorkerOptions,
    executor: Arc<dyn TaskExecutor>,
    task_service: Arc<TaskService>,
    permits: Arc<Semaphore>,
}

impl WorkerLoop {
    pub fn new(
        options: WorkerOptions,
        executor: Arc<dyn TaskExecutor>,
        task_service: Arc<TaskService>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(options.ceiling.max(1)));
        Self {
            options,
            executor,
            task_service,
            permits,
        }
    }

    /// Spawn the interval loop. Every tick runs as its own task so a slow
    /// drain can overlap the next tick up to the ceiling.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.options.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let worker = Arc::clone(&self);
                        tokio::spawn(async move { worker.tick().await });
                    }
                }
            }
        })
    }

    /// One scheduler tick: claim and drain runnable tasks serially.
    pub async fn tick(&self) {
        if !self.options.enabled {
            return;
        }
        let Ok(_permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            // every slot is draining already
            return;
        };
        let name = self.options.name;
        let in_flight = self.options.ceiling - self.permits.available_permits();

        loop {
            let task = match self
                .task_service
                .find_execute_task(self.executor.task_type())
                .await
            {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(err) => {
                    error!("[{name}:executeTask:error][{in_flight}] claim failed: {err}");
                    break;
                }
            };

            let started = Instant::now();
            let delay_ms = (Utc::now() - task.updated_at).num_milliseconds();
            info!(
                "[{name}:executeTask:start][{in_flight}] taskId: {}, targetName: {}, attempts: {}, params: {}, delay {delay_ms}ms",
                task.task_id, task.target_name, task.attempts, task.data
            );

            let mut task = task;
            match self.executor.execute(&mut task).await {
                Ok(()) => {
                    if let Err(err) = self.task_service.finish_success(&mut task).await {
                        error!(
                            "[{name}:executeTask:error][{in_flight}] taskId: {}, finish failed: {err}",
                            task.task_id
                        );
                        break;
                    }
                    info!(
                        "[{name}:executeTask:success][{in_flight}] taskId: {}, targetName: {}, use {}ms",
                        task.task_id,
                        task.target_name,
                        started.elapsed().as_millis()
                    );
                }
                Err(err) => {
                    error!(
                        "[{name}:executeTask:fail][{in_flight}] taskId: {}, targetName: {}, error: {err}",
                        task.task_id, task.target_name
                    );
                    if let Err(finish_err) = self.task_service.finish_failure(&mut task, &err).await
                    {
                        error!(
                            "[{name}:executeTask:error][{in_flight}] taskId: {}, finish failed: {finish_err}",
                            task.task_id
                        );
                    }
                    // the failure is on the task; the next tick carries on
                    break;
                }
            }

            if self.permits.available_permits() == 0 {
                info!(
                    "[{name}:executeTask][{in_flight}] every slot busy, exceed max concurrent tasks {}",
                    self.options.ceiling
                );
                break;
            }
        }
    }
}
