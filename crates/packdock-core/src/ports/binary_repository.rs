//! Mirrored binary record port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RepositoryError;

/// One mirrored remote artifact or directory, keyed `(category, parent, name)`.
///
/// `category` is the binary source name (e.g. `node`), `parent` the
/// directory path inside that source (e.g. `/v18.15.0/`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryEntry {
    pub binary_id: String,
    pub category: String,
    pub parent: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Upstream-formatted date string; a change means the item was republished.
    pub date: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BinaryEntry {
    /// Create a new entry for a freshly discovered item.
    pub fn new(
        category: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
        is_dir: bool,
        size: u64,
        date: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            binary_id: Uuid::new_v4().simple().to_string(),
            category: category.into(),
            parent: parent.into(),
            name: name.into(),
            is_dir,
            size,
            date: date.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Port for the mirrored-binary record store.
#[async_trait]
pub trait BinaryRepository: Send + Sync {
    /// Find one entry by its natural key.
    async fn find_binary(
        &self,
        category: &str,
        parent: &str,
        name: &str,
    ) -> Result<Option<BinaryEntry>, RepositoryError>;

    /// List all entries directly under one directory.
    async fn list_binaries(
        &self,
        category: &str,
        parent: &str,
    ) -> Result<Vec<BinaryEntry>, RepositoryError>;

    /// Insert or update an entry (upsert on the natural key, refreshing
    /// `size`, `date`, `updated_at`).
    async fn save_binary(&self, entry: &BinaryEntry) -> Result<(), RepositoryError>;
}
