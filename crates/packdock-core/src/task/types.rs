//! Task family and state enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of task families.
///
/// Each family has its own worker loop, concurrency ceiling, and executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Synchronize one package (manifest + tarballs) from the upstream registry.
    SyncPackage,
    /// Mirror one binary source (directory tree of artifacts).
    SyncBinary,
    /// Deliver one webhook to a subscriber endpoint.
    TriggerHook,
    /// Refresh one cached proxy file from the upstream registry.
    UpdateProxyCache,
}

impl TaskType {
    /// Stable string tag, used in storage and log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyncPackage => "sync_package",
            Self::SyncBinary => "sync_binary",
            Self::TriggerHook => "trigger_hook",
            Self::UpdateProxyCache => "update_proxy_cache",
        }
    }

    /// Whether at most one active (waiting/processing) task may exist per
    /// target for this family.
    ///
    /// Hook deliveries are fan-out by nature: many hooks can fire for the
    /// same target, so they are not target-exclusive.
    #[must_use]
    pub const fn is_target_exclusive(self) -> bool {
        !matches!(self, Self::TriggerHook)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_package" => Ok(Self::SyncPackage),
            "sync_binary" => Ok(Self::SyncBinary),
            "trigger_hook" => Ok(Self::TriggerHook),
            "update_proxy_cache" => Ok(Self::UpdateProxyCache),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// Task lifecycle state.
///
/// Legal transitions: `Waiting -> Processing -> {Success | Fail}`, and
/// `Processing -> Waiting` when a failed attempt is re-queued below the
/// retry ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Waiting,
    Processing,
    Success,
    Fail,
}

impl TaskState {
    /// Stable string tag, used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }

    /// Terminal states are archived and never re-claimed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }

    /// Whether a transition to `next` is legal.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Processing)
                | (Self::Processing, Self::Success)
                | (Self::Processing, Self::Fail)
                | (Self::Processing, Self::Waiting)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}
