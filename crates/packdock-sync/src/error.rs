//! The executor error taxonomy.

use packdock_core::ports::RepositoryError;
use packdock_sources::SourceError;
use thiserror::Error;

/// Errors a task execution can end in.
///
/// Retryable errors re-queue the task until its attempt ceiling; permanent
/// ones fail it on the spot. Lock contention is an expected, non-fatal
/// condition and surfaces as a retryable conflict, never as a fault.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another worker holds the target's lock; try again later.
    #[error("'{name}' is being processed elsewhere, try again later")]
    LockHeld { name: String },

    /// Transient upstream failure (5xx, unexpected status).
    #[error("upstream answered {status}: {url}")]
    Upstream { status: u16, url: String },

    /// Permanent upstream rejection: the target does not exist.
    #[error("'{target}' not found upstream")]
    NotFound { target: String },

    /// Permanent rejection by policy (allow-list denial, unknown source).
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// The downloaded artifact is not a readable archive.
    ///
    /// Callers treat this as a soft empty result so one corrupt upload
    /// cannot poison the retry loop.
    #[error("bad archive: {message}")]
    BadArchive { message: String },

    /// The task payload does not deserialize into its family's schema.
    #[error("invalid task data: {message}")]
    InvalidData { message: String },

    /// Store fault, propagated to the worker loop.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Upstream client fault, propagated to the worker loop.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Local I/O fault.
    #[error("io error: {0}")]
    Io(String),
}

impl SyncError {
    pub fn lock_held(name: impl Into<String>) -> Self {
        Self::LockHeld { name: name.into() }
    }

    pub fn upstream(status: u16, url: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            url: url.into(),
        }
    }

    pub fn not_found(target: impl Into<String>) -> Self {
        Self::NotFound {
            target: target.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn bad_archive(message: impl Into<String>) -> Self {
        Self::BadArchive {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Whether a failed task should be re-queued (below its attempt
    /// ceiling) instead of failing permanently.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::LockHeld { .. }
            | Self::Upstream { .. }
            | Self::Repository(_)
            | Self::Io(_) => true,
            Self::NotFound { .. }
            | Self::Forbidden { .. }
            | Self::BadArchive { .. }
            | Self::InvalidData { .. } => false,
            Self::Source(source) => !matches!(source, SourceError::NotFound { .. }),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_split_follows_the_taxonomy() {
        assert!(SyncError::lock_held("pkg:publish").is_retryable());
        assert!(SyncError::upstream(503, "https://r.example.com/pkg").is_retryable());
        assert!(SyncError::Io("disk full".to_string()).is_retryable());
        assert!(
            SyncError::Source(SourceError::Timeout {
                url: "https://r.example.com".to_string()
            })
            .is_retryable()
        );

        assert!(!SyncError::not_found("pkg").is_retryable());
        assert!(!SyncError::forbidden("not in allow list").is_retryable());
        assert!(!SyncError::invalid_data("missing endpoint").is_retryable());
        assert!(
            !SyncError::Source(SourceError::NotFound {
                fullname: "pkg".to_string()
            })
            .is_retryable()
        );
    }

    #[test]
    fn lock_contention_reads_as_try_later() {
        let err = SyncError::lock_held("lodash:publish");
        assert!(err.to_string().contains("try again later"));
    }
}
