//! Distributed advisory locks on the shared key-value store.
//!
//! A lock is a namespaced key holding one value: the expiry timestamp in
//! milliseconds, which doubles as the token returned to the holder. A lock
//! can be acquired only if absent or expired; release is compare-then-delete
//! so a slow caller cannot release a lock that was re-acquired by someone
//! else after its own grant expired.
//!
//! Acquisition failure is a normal outcome (`None`), not an error: callers
//! must treat it as "try later" and never assume exclusive access without a
//! token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::kv::KvStore;
use crate::ports::RepositoryError;

const LOCK_PREFIX: &str = "PACKDOCK_L_";

/// Acquires and releases named, time-bounded advisory locks.
#[derive(Clone)]
pub struct LockManager {
    kv: Arc<dyn KvStore>,
}

impl LockManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Try to acquire the lock for `ttl_secs`.
    ///
    /// Returns the token on success, `None` when the lock is held by
    /// someone else. A stale lock (stored expiry more than one ttl in the
    /// past) is deleted and taken over; the delete and the subsequent
    /// set-if-absent are two operations, so a second racer can slip in
    /// between them and win — the set-if-absent decides, and this caller
    /// then simply fails the acquisition.
    pub async fn lock(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, RepositoryError> {
        let name = lock_name(key);
        let ttl_ms = i64::try_from(ttl_secs * 1000)
            .map_err(|_| RepositoryError::Storage(format!("lock ttl out of range: {ttl_secs}")))?;
        let now = Utc::now().timestamp_millis();

        if let Some(stored) = self.kv.get(&name).await? {
            let stored_expiry: i64 = stored.parse().unwrap_or(0);
            // The stored value is itself a future expiry timestamp, so this
            // keeps the lock for a margin of one ttl beyond it; the key's own
            // ttl normally cleans it up first.
            if now - stored_expiry < ttl_ms {
                return Ok(None);
            }
            self.kv.delete(&name).await?;
        }

        let token = (now + ttl_ms).to_string();
        if !self.kv.set_nx(&name, &token).await? {
            // someone else won the race
            return Ok(None);
        }
        // self-clean abandoned locks even without an explicit release
        self.kv.expire(&name, Duration::from_secs(ttl_secs)).await?;
        Ok(Some(token))
    }

    /// Release the lock, but only if `token` is still the stored value.
    ///
    /// A mismatch means the grant expired and another holder took over;
    /// releasing then is a no-op.
    pub async fn unlock(&self, key: &str, token: &str) -> Result<(), RepositoryError> {
        let name = lock_name(key);
        match self.kv.get(&name).await? {
            Some(stored) if stored == token => self.kv.delete(&name).await,
            _ => Ok(()),
        }
    }

    /// Run `f` under the lock; returns `Some(output)` if it ran, `None` if
    /// the lock could not be acquired. The lock is released afterwards in
    /// all cases.
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: &str,
        ttl_secs: u64,
        f: F,
    ) -> Result<Option<T>, RepositoryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(token) = self.lock(key, ttl_secs).await? else {
            return Ok(None);
        };
        let output = f().await;
        self.unlock(key, &token).await?;
        Ok(Some(output))
    }
}

fn lock_name(key: &str) -> String {
    format!("{LOCK_PREFIX}{key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn manager() -> LockManager {
        LockManager::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let lock = manager();
        let token = lock.lock("pkg:publish", 10).await.unwrap();
        assert!(token.is_some());
        assert!(lock.lock("pkg:publish", 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_acquires_grant_exactly_one_token() {
        let lock = Arc::new(manager());
        let a = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.lock("race", 10).await.unwrap() })
        };
        let b = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.lock("race", 10).await.unwrap() })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a.is_some() ^ b.is_some(), "exactly one acquire must win");
    }

    #[tokio::test]
    async fn release_frees_the_lock() {
        let lock = manager();
        let token = lock.lock("pkg:publish", 10).await.unwrap().unwrap();
        lock.unlock("pkg:publish", &token).await.unwrap();
        assert!(lock.lock("pkg:publish", 10).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over_without_release() {
        let lock = manager();
        assert!(lock.lock("stale", 1).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(lock.lock("stale", 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn release_with_stale_token_keeps_new_holders_lock() {
        let lock = manager();
        let old_token = lock.lock("takeover", 1).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let new_token = lock.lock("takeover", 10).await.unwrap().unwrap();
        assert_ne!(old_token, new_token);

        // the first holder is slow and releases with its old token
        lock.unlock("takeover", &old_token).await.unwrap();

        // the new holder's lock is untouched
        assert!(lock.lock("takeover", 10).await.unwrap().is_none());
        lock.unlock("takeover", &new_token).await.unwrap();
        assert!(lock.lock("takeover", 10).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn with_lock_runs_only_when_acquired() {
        let lock = manager();
        let ran = lock.with_lock("wrapped", 10, || async { 41 + 1 }).await.unwrap();
        assert_eq!(ran, Some(42));

        // hold the lock, the closure must not run
        let _token = lock.lock("held", 10).await.unwrap().unwrap();
        let skipped = lock.with_lock("held", 10, || async { 1 }).await.unwrap();
        assert_eq!(skipped, None);
    }

    #[tokio::test]
    async fn with_lock_releases_afterwards() {
        let lock = manager();
        lock.with_lock("released", 10, || async {}).await.unwrap();
        assert!(lock.lock("released", 10).await.unwrap().is_some());
    }
}
