//! Distributed named mutex with TTL.
//!
//! Prevents overlapping sync runs across processes. The store seam
//! ([`LockStore`]) has three primitives — put-if-absent, extend-if-held,
//! delete-if-held — all holder-checked so a crashed process whose TTL
//! expired can never release or refresh a lock someone else re-acquired.
//!
//! Production uses Redis (`SET NX PX` + holder-compare Lua scripts);
//! tests use the in-memory store.
//!
//! Locking discipline: only the top-level run acquires a lock, and never
//! while holding another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rsb_schemas::{SyncError, SyncResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod redis_store;

pub use redis_store::RedisLockStore;

/// Key-value primitives the lock is built on.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Store `key → holder` with `ttl` only if `key` is absent.
    /// Returns `true` on acquisition.
    async fn put_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> SyncResult<bool>;

    /// Extend the TTL only if `key` is still owned by `holder`.
    async fn extend_if_held(&self, key: &str, holder: &str, ttl: Duration) -> SyncResult<bool>;

    /// Delete only if `key` is still owned by `holder`.
    async fn delete_if_held(&self, key: &str, holder: &str) -> SyncResult<bool>;
}

#[async_trait]
impl<T: LockStore + ?Sized> LockStore for Arc<T> {
    async fn put_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> SyncResult<bool> {
        (**self).put_if_absent(key, holder, ttl).await
    }

    async fn extend_if_held(&self, key: &str, holder: &str, ttl: Duration) -> SyncResult<bool> {
        (**self).extend_if_held(key, holder, ttl).await
    }

    async fn delete_if_held(&self, key: &str, holder: &str) -> SyncResult<bool> {
        (**self).delete_if_held(key, holder).await
    }
}

/// A named lock bound to one holder identity. Clones share the holder, so
/// a background keeper can refresh the same acquisition.
#[derive(Clone)]
pub struct DistributedLock<S: LockStore> {
    store: S,
    name: String,
    holder: String,
    ttl: Duration,
}

impl<S: LockStore> DistributedLock<S> {
    pub fn new(store: S, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            name: name.into(),
            holder: uuid::Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Try to take the lock. `Err(LockHeld)` means another holder owns it;
    /// callers treat that as "skip this tick", not as a failure.
    pub async fn acquire(&self) -> SyncResult<()> {
        let taken = self
            .store
            .put_if_absent(&self.name, &self.holder, self.ttl)
            .await?;
        if taken {
            info!(lock = %self.name, holder = %self.holder, "lock acquired");
            Ok(())
        } else {
            Err(SyncError::lock_held(self.name.clone()))
        }
    }

    /// Extend the TTL; `Ok(false)` means the lock was lost to another holder.
    pub async fn refresh(&self) -> SyncResult<bool> {
        self.store
            .extend_if_held(&self.name, &self.holder, self.ttl)
            .await
    }

    /// Release if still held. Losing the lock first is not an error.
    pub async fn release(&self) -> SyncResult<()> {
        let released = self.store.delete_if_held(&self.name, &self.holder).await?;
        if released {
            info!(lock = %self.name, "lock released");
        } else {
            warn!(lock = %self.name, "lock was no longer held at release");
        }
        Ok(())
    }

    /// Background refresh loop for a long-running holder.
    ///
    /// Refreshes at `ttl / 3`. After three consecutive refresh failures
    /// (errors or lost ownership) the run can no longer assume mutual
    /// exclusion, so `abort` is cancelled and the loop exits. The loop also
    /// exits quietly when `done` fires.
    pub async fn keep_alive(&self, done: CancellationToken, abort: CancellationToken) {
        let period = self.ttl / 3;
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = done.cancelled() => return,
                _ = tokio::time::sleep(period) => {}
            }

            match self.refresh().await {
                Ok(true) => {
                    consecutive_failures = 0;
                }
                Ok(false) => {
                    consecutive_failures += 1;
                    warn!(lock = %self.name, consecutive_failures, "lock no longer held");
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(lock = %self.name, consecutive_failures, error = %err, "lock refresh failed");
                }
            }

            if consecutive_failures >= 3 {
                warn!(lock = %self.name, "lost lock after 3 failed refreshes, aborting run");
                abort.cancel();
                return;
            }
        }
    }
}

/// Store that always grants. Used when `ENABLE_SYNC_LOCK` is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLockStore;

#[async_trait]
impl LockStore for NullLockStore {
    async fn put_if_absent(&self, _key: &str, _holder: &str, _ttl: Duration) -> SyncResult<bool> {
        Ok(true)
    }

    async fn extend_if_held(&self, _key: &str, _holder: &str, _ttl: Duration) -> SyncResult<bool> {
        Ok(true)
    }

    async fn delete_if_held(&self, _key: &str, _holder: &str) -> SyncResult<bool> {
        Ok(true)
    }
}

/// In-process store with real TTL semantics. Tests and single-node use.
#[derive(Default)]
pub struct MemoryLockStore {
    entries: StdMutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(entries: &mut HashMap<String, (String, Instant)>) {
        let now = Instant::now();
        entries.retain(|_, (_, deadline)| *deadline > now);
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn put_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> SyncResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (holder.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn extend_if_held(&self, key: &str, holder: &str, ttl: Duration) -> SyncResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        match entries.get_mut(key) {
            Some((owner, deadline)) if owner == holder => {
                *deadline = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_held(&self, key: &str, holder: &str) -> SyncResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        match entries.get(key) {
            Some((owner, _)) if owner == holder => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn second_holder_is_refused() {
        let store = Arc::new(MemoryLockStore::new());
        let a = DistributedLock::new(Arc::clone(&store) as Arc<dyn LockStore>, "sync/x", TTL);
        let b = DistributedLock::new(store as Arc<dyn LockStore>, "sync/x", TTL);

        a.acquire().await.unwrap();
        let err = b.acquire().await.unwrap_err();
        assert_eq!(err.kind, rsb_schemas::ErrorKind::LockHeld);
    }

    #[tokio::test]
    async fn release_frees_for_next_holder() {
        let store = Arc::new(MemoryLockStore::new());
        let a = DistributedLock::new(Arc::clone(&store) as Arc<dyn LockStore>, "sync/x", TTL);
        let b = DistributedLock::new(store as Arc<dyn LockStore>, "sync/x", TTL);

        a.acquire().await.unwrap();
        a.release().await.unwrap();
        b.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn refresh_fails_for_lost_lock() {
        let store = Arc::new(MemoryLockStore::new());
        let a = DistributedLock::new(Arc::clone(&store) as Arc<dyn LockStore>, "sync/x", TTL);
        a.acquire().await.unwrap();

        // Steal the key (as TTL expiry + re-acquire would).
        store
            .entries
            .lock()
            .unwrap()
            .insert("sync/x".into(), ("thief".into(), Instant::now() + TTL));

        assert!(!a.refresh().await.unwrap());
    }

    #[tokio::test]
    async fn release_of_stolen_lock_is_noop() {
        let store = Arc::new(MemoryLockStore::new());
        let a = DistributedLock::new(Arc::clone(&store) as Arc<dyn LockStore>, "sync/x", TTL);
        a.acquire().await.unwrap();
        store
            .entries
            .lock()
            .unwrap()
            .insert("sync/x".into(), ("thief".into(), Instant::now() + TTL));

        a.release().await.unwrap();
        // Thief still owns the key.
        let entries = store.entries.lock().unwrap();
        assert_eq!(entries.get("sync/x").unwrap().0, "thief");
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let store = Arc::new(MemoryLockStore::new());
        let a = DistributedLock::new(
            Arc::clone(&store) as Arc<dyn LockStore>,
            "sync/x",
            Duration::from_millis(1),
        );
        let b = DistributedLock::new(store as Arc<dyn LockStore>, "sync/x", TTL);

        a.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        b.acquire().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn keeper_aborts_after_three_failed_refreshes() {
        let store = Arc::new(MemoryLockStore::new());
        let lock = DistributedLock::new(
            Arc::clone(&store) as Arc<dyn LockStore>,
            "sync/x",
            Duration::from_secs(9),
        );
        lock.acquire().await.unwrap();

        // Steal the key so every refresh reports lost ownership. The memory
        // store tracks real time but under a paused clock nothing expires;
        // overwrite directly.
        store
            .entries
            .lock()
            .unwrap()
            .insert("sync/x".into(), ("thief".into(), Instant::now() + TTL));

        let done = CancellationToken::new();
        let abort = CancellationToken::new();
        let keeper = tokio::spawn({
            let abort = abort.clone();
            let done = done.clone();
            async move { lock.keep_alive(done, abort).await }
        });

        // 3 refresh periods of ttl/3 = 3s each.
        tokio::time::sleep(Duration::from_secs(10)).await;
        keeper.await.unwrap();
        assert!(abort.is_cancelled());
    }

    #[tokio::test]
    async fn null_store_always_grants() {
        let a = DistributedLock::new(NullLockStore, "sync/x", TTL);
        let b = DistributedLock::new(NullLockStore, "sync/x", TTL);
        a.acquire().await.unwrap();
        b.acquire().await.unwrap();
    }
}
