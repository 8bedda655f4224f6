//! Agent ready pool.
//!
//! When a call ends, its agent goes back into the pool the chat and voice
//! routers draw from: a status key per agent, a load sorted set (active work
//! per agent) and a ready sorted set.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::KeyConfig;
use crate::store::{KeyedStore, StoreResult};

/// Status value of an agent that can take new work
pub const READY: &str = "READY";

#[derive(Clone)]
pub struct ReadyPool {
    store: Arc<dyn KeyedStore>,
    keys: KeyConfig,
}

impl ReadyPool {
    pub fn new(store: Arc<dyn KeyedStore>, keys: KeyConfig) -> Self {
        Self { store, keys }
    }

    /// Put the agent back into the ready pool. Best-effort: failures are logged.
    ///
    /// An agent already marked `READY` is left untouched so repeated restores do
    /// not decrement its load twice.
    pub async fn restore_ready(&self, agent_id: &str) {
        match self.try_restore(agent_id).await {
            Ok(true) => debug!(agent_id, "🟢 Agent restored to ready pool"),
            Ok(false) => debug!(agent_id, "Agent already ready"),
            Err(e) => warn!(agent_id, error = %e, "⚠️ Agent ready-pool restore failed"),
        }
    }

    async fn try_restore(&self, agent_id: &str) -> StoreResult<bool> {
        let status_key = self.keys.agent_status_key(agent_id);
        if self.store.get(&status_key).await?.as_deref() == Some(READY) {
            return Ok(false);
        }
        self.store.set(&status_key, READY, None).await?;

        let load = self.store.zscore(&self.keys.load_zset, agent_id).await?;
        if load.map_or(false, |load| load > 0.0) {
            self.store.zincrby(&self.keys.load_zset, -1.0, agent_id).await?;
        }

        self.store.zadd(&self.keys.ready_zset, 0.0, agent_id).await?;
        Ok(true)
    }

    pub async fn status(&self, agent_id: &str) -> StoreResult<Option<String>> {
        self.store.get(&self.keys.agent_status_key(agent_id)).await
    }

    pub async fn is_ready(&self, agent_id: &str) -> StoreResult<bool> {
        Ok(self.store.zscore(&self.keys.ready_zset, agent_id).await?.is_some())
    }
}
