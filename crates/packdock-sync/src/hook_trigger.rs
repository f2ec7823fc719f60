//! Webhook delivery executor.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use url::Url;

use packdock_core::task::{Task, TaskType, TriggerHookData};
use packdock_sources::HttpBackend;

use crate::error::SyncError;
use crate::task_service::TaskService;
use crate::worker::TaskExecutor;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers one event to one subscriber endpoint.
///
/// The body is signed with the subscriber's shared secret so the receiver
/// can verify the origin. A non-2xx answer is a transient subscriber
/// problem and re-queues the task up to its attempt ceiling.
pub struct HookTrigger {
    backend: Arc<dyn HttpBackend>,
    task_service: Arc<TaskService>,
}

impl HookTrigger {
    pub fn new(backend: Arc<dyn HttpBackend>, task_service: Arc<TaskService>) -> Self {
        Self {
            backend,
            task_service,
        }
    }

    fn signature(secret: &str, body: &str) -> String {
        let digest = Sha256::digest(format!("{secret}{body}").as_bytes());
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            write!(hex, "{byte:02x}").unwrap();
        }
        format!("sha256={hex}")
    }
}

#[async_trait]
impl TaskExecutor for HookTrigger {
    fn task_type(&self) -> TaskType {
        TaskType::TriggerHook
    }

    async fn execute(&self, task: &mut Task) -> Result<(), SyncError> {
        let data: TriggerHookData = serde_json::from_value(task.data.clone())
            .map_err(|err| SyncError::invalid_data(err.to_string()))?;
        let url = Url::parse(&data.endpoint)
            .map_err(|err| SyncError::invalid_data(format!("bad hook endpoint: {err}")))?;

        let body = serde_json::json!({
            "event": data.event,
            "target": task.target_name,
            "payload": data.payload,
        });
        let body_text = body.to_string();
        let headers = vec![
            (
                "x-packdock-signature".to_string(),
                Self::signature(&data.secret, &body_text),
            ),
            ("x-packdock-event".to_string(), data.event.clone()),
            ("x-packdock-hook-id".to_string(), data.hook_id.clone()),
        ];

        let status = self
            .backend
            .post_json(&url, &body, &headers, DELIVERY_TIMEOUT)
            .await?;
        self.task_service
            .append_task_log(
                task,
                &format!(
                    "delivered '{}' to {} for hook {}, status {status}",
                    data.event, data.endpoint, data.hook_id
                ),
            )
            .await;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(SyncError::upstream(status, url.as_str()))
        }
    }
}
