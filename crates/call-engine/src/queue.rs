//! # Waiting Queue
//!
//! One sorted set of session ids scored by enqueue time (epoch milliseconds).
//! The oldest request sits at rank 0, so listing is FIFO by enqueue time.
//! Removal doubles as the claim arbiter during `accept`: of several callers
//! removing the same id, exactly one observes `true`.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::store::{KeyedStore, StoreResult};

#[derive(Clone)]
pub struct WaitingQueue {
    store: Arc<dyn KeyedStore>,
    key: String,
}

impl WaitingQueue {
    pub fn new(store: Arc<dyn KeyedStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Add a session scored by the current time and return that time (epoch ms).
    ///
    /// Re-adding an id already in the queue refreshes its score, moving it to the
    /// back of the line.
    pub async fn enqueue(&self, session_id: &str) -> StoreResult<i64> {
        let enqueued_at = Utc::now().timestamp_millis();
        let is_new = self.store.zadd(&self.key, enqueued_at as f64, session_id).await?;
        debug!(session_id, is_new, enqueued_at, "📥 Session enqueued");
        Ok(enqueued_at)
    }

    /// Up to `limit` session ids, oldest first. An empty queue yields an empty list.
    pub async fn list(&self, limit: usize) -> StoreResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);
        self.store.zrange(&self.key, 0, stop).await
    }

    /// Remove a session. Returns whether it was actually present.
    pub async fn remove(&self, session_id: &str) -> StoreResult<bool> {
        self.store.zrem(&self.key, session_id).await
    }

    pub async fn contains(&self, session_id: &str) -> StoreResult<bool> {
        Ok(self.store.zscore(&self.key, session_id).await?.is_some())
    }

    /// Epoch milliseconds at which the session was (last) enqueued
    pub async fn enqueued_at(&self, session_id: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .store
            .zscore(&self.key, session_id)
            .await?
            .map(|score| score as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queue() -> WaitingQueue {
        WaitingQueue::new(Arc::new(MemoryStore::new()), "call:voice:waiting")
    }

    #[tokio::test]
    async fn test_list_oldest_first() {
        let queue = queue();
        queue.enqueue("S1").await.unwrap();
        queue.enqueue("S2").await.unwrap();

        assert_eq!(queue.list(1).await.unwrap(), vec!["S1"]);
        assert_eq!(queue.list(10).await.unwrap(), vec!["S1", "S2"]);
    }

    #[tokio::test]
    async fn test_empty_queue_lists_nothing() {
        let queue = queue();
        assert!(queue.list(50).await.unwrap().is_empty());
        assert!(queue.list(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let queue = queue();
        queue.enqueue("S1").await.unwrap();

        assert!(queue.contains("S1").await.unwrap());
        assert!(queue.remove("S1").await.unwrap());
        assert!(!queue.remove("S1").await.unwrap());
        assert!(!queue.remove("never-enqueued").await.unwrap());
        assert!(!queue.contains("S1").await.unwrap());
    }

    #[tokio::test]
    async fn test_reenqueue_keeps_single_entry() {
        let queue = queue();
        queue.enqueue("S1").await.unwrap();
        queue.enqueue("S1").await.unwrap();

        assert_eq!(queue.list(10).await.unwrap(), vec!["S1"]);
        assert!(queue.enqueued_at("S1").await.unwrap().is_some());
    }
}
