//! In-memory key-value store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::KvStore;
use crate::ports::RepositoryError;

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Single-node in-memory [`KvStore`] with real TTL expiry.
///
/// Expired entries are dropped lazily on access. `set_nx` holds the map
/// mutex across the presence check and the insert, which makes it the
/// atomic conditional write the lock manager relies on.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), RepositoryError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        entries.remove(key);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, RepositoryError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        let now = Instant::now();
        let present = entries.get(key).is_some_and(|entry| !entry.is_expired(now));
        if present {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RepositoryError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
