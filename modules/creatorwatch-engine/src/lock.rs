use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tracing::{info, warn};

use creatorwatch_common::{RunLock, StoreError};

use crate::traits::RunStore;

/// What a component answers when its backing store errors out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let the guarded action proceed.
    #[default]
    Open,
    /// Block the guarded action.
    Closed,
}

/// Per-(subject, date) mutual exclusion backed by a primary-key row.
///
/// `acquire` is the only synchronization point. `is_held` exists for
/// diagnostics and must not gate a second acquisition.
pub struct RunLockManager {
    store: Arc<dyn RunStore>,
    ttl: Duration,
    policy: FailurePolicy,
}

impl RunLockManager {
    pub fn new(store: Arc<dyn RunStore>, ttl: Duration, policy: FailurePolicy) -> Self {
        Self { store, ttl, policy }
    }

    pub async fn acquire(&self, subject_id: &str, report_date: NaiveDate) -> bool {
        let key = RunLock::key_for(subject_id, report_date);

        match self.try_insert(&key).await {
            Ok(()) => {
                info!(key = key.as_str(), "Run lock acquired");
                return true;
            }
            Err(StoreError::Duplicate(_)) => {}
            Err(e) => return self.on_store_error(&key, &e),
        }

        let existing = match self.store.get_lock(&key).await {
            Ok(existing) => existing,
            Err(e) => return self.on_store_error(&key, &e),
        };

        match existing {
            Some(lock) if !lock.is_expired(Utc::now()) => {
                info!(
                    key = key.as_str(),
                    expires_at = %lock.expires_at,
                    "Run lock held elsewhere"
                );
                false
            }
            // Expired, or released between our insert and read. Clear it and retry once.
            _ => {
                if let Err(e) = self.store.delete_lock(&key).await {
                    return self.on_store_error(&key, &e);
                }
                match self.try_insert(&key).await {
                    Ok(()) => {
                        info!(key = key.as_str(), "Run lock acquired after clearing stale lock");
                        true
                    }
                    Err(StoreError::Duplicate(_)) => {
                        info!(key = key.as_str(), "Run lock taken by another process during retry");
                        false
                    }
                    Err(e) => self.on_store_error(&key, &e),
                }
            }
        }
    }

    /// Delete the lock. Missing rows and store errors are logged, never returned.
    pub async fn release(&self, subject_id: &str, report_date: NaiveDate) {
        let key = RunLock::key_for(subject_id, report_date);
        match self.store.delete_lock(&key).await {
            Ok(()) => info!(key = key.as_str(), "Run lock released"),
            Err(e) => warn!(key = key.as_str(), error = %e, "Failed to release run lock"),
        }
    }

    pub async fn is_held(&self, subject_id: &str, report_date: NaiveDate) -> bool {
        let key = RunLock::key_for(subject_id, report_date);
        match self.store.get_lock(&key).await {
            Ok(Some(lock)) => !lock.is_expired(Utc::now()),
            Ok(None) => false,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Failed to read run lock");
                false
            }
        }
    }

    async fn try_insert(&self, key: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        let lock = RunLock {
            key: key.to_string(),
            acquired_at: now,
            expires_at: now + self.ttl,
        };
        self.store.insert_lock(&lock).await
    }

    fn on_store_error(&self, key: &str, error: &StoreError) -> bool {
        match self.policy {
            FailurePolicy::Open => {
                warn!(key, error = %error, "Run lock store error, proceeding without lock");
                true
            }
            FailurePolicy::Closed => {
                warn!(key, error = %error, "Run lock store error, refusing to run");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    fn manager(store: &Arc<MemoryStore>, policy: FailurePolicy) -> RunLockManager {
        RunLockManager::new(store.clone(), Duration::minutes(30), policy)
    }

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(&store, FailurePolicy::Open);

        assert!(locks.acquire("creator", date()).await);
        assert!(!locks.acquire("creator", date()).await);
        assert!(locks.is_held("creator", date()).await);

        locks.release("creator", date()).await;
        assert!(!locks.is_held("creator", date()).await);
        assert!(locks.acquire("creator", date()).await);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(&store, FailurePolicy::Open);
        locks.release("creator", date()).await;
        locks.release("creator", date()).await;
        assert!(locks.acquire("creator", date()).await);
    }

    #[tokio::test]
    async fn expired_lock_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .insert_lock(&RunLock {
                key: RunLock::key_for("creator", date()),
                acquired_at: now - Duration::hours(2),
                expires_at: now - Duration::hours(1),
            })
            .await
            .unwrap();

        let locks = manager(&store, FailurePolicy::Open);
        assert!(locks.acquire("creator", date()).await);
        let lock = store
            .get_lock(&RunLock::key_for("creator", date()))
            .await
            .unwrap()
            .unwrap();
        assert!(lock.expires_at > now);
    }

    #[tokio::test]
    async fn different_dates_do_not_contend() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(&store, FailurePolicy::Open);
        assert!(locks.acquire("creator", date()).await);
        assert!(locks.acquire("creator", date().succ_opt().unwrap()).await);
        assert!(locks.acquire("other", date()).await);
    }

    #[tokio::test]
    async fn store_errors_follow_failure_policy() {
        let store = Arc::new(MemoryStore::new());
        store.fail_locks(true);

        assert!(manager(&store, FailurePolicy::Open).acquire("creator", date()).await);
        assert!(!manager(&store, FailurePolicy::Closed).acquire("creator", date()).await);
    }

    #[tokio::test]
    async fn concurrent_acquires_admit_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        let a = manager(&store, FailurePolicy::Open);
        let b = manager(&store, FailurePolicy::Open);

        let (first, second) = tokio::join!(
            a.acquire("creator", date()),
            b.acquire("creator", date())
        );
        assert!(first ^ second);
    }
}
