//! Typed task payloads.
//!
//! Task `data` is stored as opaque JSON; these are the schemas each family
//! reads back out. Unknown fields are ignored so payloads can grow without
//! breaking queued tasks.

use serde::{Deserialize, Serialize};

/// Payload for [`TaskType::SyncPackage`](super::TaskType::SyncPackage).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPackageData {
    /// Free-form note on why the sync was requested, echoed into the log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tips: Option<String>,

    /// Restrict the sync to these versions instead of the full diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_versions: Option<Vec<String>>,
}

/// Payload for [`TaskType::TriggerHook`](super::TaskType::TriggerHook).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerHookData {
    /// Subscriber hook id.
    pub hook_id: String,

    /// Subscriber endpoint URL.
    pub endpoint: String,

    /// Shared secret the delivery is signed with.
    pub secret: String,

    /// Event name, e.g. `package:publish`.
    pub event: String,

    /// Event payload forwarded verbatim.
    pub payload: serde_json::Value,
}

/// Payload for [`TaskType::UpdateProxyCache`](super::TaskType::UpdateProxyCache).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateProxyCacheData {
    /// Package fullname the cached file belongs to.
    pub fullname: String,

    /// Cached file kind tag, see `ProxyFileType`.
    pub file_type: String,
}
