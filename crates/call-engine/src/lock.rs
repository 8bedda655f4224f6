//! Short-lived per-session claim lock.
//!
//! The lock only keeps two agents from attempting the queue removal for the same
//! session at the same instant. It does not decide who wins; the removal does.
//! `accept` never releases it, so it lives for its full TTL; `end` deletes it.

use std::sync::Arc;
use std::time::Duration;

use crate::config::KeyConfig;
use crate::store::{KeyedStore, StoreResult};

#[derive(Clone)]
pub struct SessionLock {
    store: Arc<dyn KeyedStore>,
    keys: KeyConfig,
}

impl SessionLock {
    pub fn new(store: Arc<dyn KeyedStore>, keys: KeyConfig) -> Self {
        Self { store, keys }
    }

    /// Atomic set-if-absent. `true` means the lock was granted to `holder`.
    pub async fn try_acquire(&self, session_id: &str, holder: &str, ttl: Duration) -> StoreResult<bool> {
        self.store
            .set_nx(&self.keys.lock_key(session_id), holder, ttl)
            .await
    }

    /// Current holder, if the lock is live
    pub async fn holder(&self, session_id: &str) -> StoreResult<Option<String>> {
        self.store.get(&self.keys.lock_key(session_id)).await
    }

    /// Delete the lock whoever holds it. Idempotent.
    pub async fn clear(&self, session_id: &str) -> StoreResult<bool> {
        self.store.del(&self.keys.lock_key(session_id)).await
    }
}
