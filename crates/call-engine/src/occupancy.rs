//! # Agent Occupancy
//!
//! Enforces "at most one active call per agent" with one string key per agent
//! (`agent:active:{agentId}` -> sessionId) claimed by set-if-absent. A companion
//! key per session (`active:{sessionId}` -> agentId) records the owner so that
//! status queries and `end` can find it from the session side.
//!
//! Both keys carry the occupancy TTL as a safety net in case cleanup never runs.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::KeyConfig;
use crate::store::{KeyedStore, StoreResult};

#[derive(Clone)]
pub struct AgentOccupancy {
    store: Arc<dyn KeyedStore>,
    keys: KeyConfig,
}

impl AgentOccupancy {
    pub fn new(store: Arc<dyn KeyedStore>, keys: KeyConfig) -> Self {
        Self { store, keys }
    }

    pub async fn is_busy(&self, agent_id: &str) -> StoreResult<bool> {
        self.store.exists(&self.keys.agent_active_key(agent_id)).await
    }

    /// Atomic set-if-absent on the agent key. `true` means the agent now owns `session_id`.
    pub async fn try_claim(&self, agent_id: &str, session_id: &str, ttl: Duration) -> StoreResult<bool> {
        self.store
            .set_nx(&self.keys.agent_active_key(agent_id), session_id, ttl)
            .await
    }

    /// Unconditional delete of the agent key. Idempotent.
    pub async fn release(&self, agent_id: &str) -> StoreResult<bool> {
        self.store.del(&self.keys.agent_active_key(agent_id)).await
    }

    /// Delete the agent key only while it still points at `session_id`.
    ///
    /// The read and the delete are two store calls. While the key is live the
    /// agent cannot claim another session in between. If the key's TTL runs out
    /// in that window and the agent claims again, the delete drops the new
    /// claim; the occupancy TTL is long enough that this window is accepted.
    pub async fn release_if_holding(&self, agent_id: &str, session_id: &str) -> StoreResult<bool> {
        match self.current_session(agent_id).await? {
            Some(current) if current == session_id => self.release(agent_id).await,
            Some(current) => {
                debug!(agent_id, session_id, %current, "Agent occupied by another session, keeping it");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// The session the agent currently owns, if any
    pub async fn current_session(&self, agent_id: &str) -> StoreResult<Option<String>> {
        self.store.get(&self.keys.agent_active_key(agent_id)).await
    }

    /// Record `agent_id` as the owner of `session_id`
    pub async fn record_owner(&self, session_id: &str, agent_id: &str, ttl: Duration) -> StoreResult<()> {
        self.store
            .set(&self.keys.session_owner_key(session_id), agent_id, Some(ttl))
            .await
    }

    /// The agent recorded as owning `session_id`, if any
    pub async fn session_owner(&self, session_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .store
            .get(&self.keys.session_owner_key(session_id))
            .await?
            .filter(|owner| !owner.is_empty()))
    }

    pub async fn clear_owner(&self, session_id: &str) -> StoreResult<bool> {
        self.store.del(&self.keys.session_owner_key(session_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const TTL: Duration = Duration::from_secs(1800);

    fn occupancy() -> AgentOccupancy {
        AgentOccupancy::new(Arc::new(MemoryStore::new()), KeyConfig::default())
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let occupancy = occupancy();

        assert!(!occupancy.is_busy("A1").await.unwrap());
        assert!(occupancy.try_claim("A1", "S1", TTL).await.unwrap());
        assert!(!occupancy.try_claim("A1", "S2", TTL).await.unwrap());

        assert!(occupancy.is_busy("A1").await.unwrap());
        assert_eq!(occupancy.current_session("A1").await.unwrap().as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let occupancy = occupancy();
        occupancy.try_claim("A1", "S1", TTL).await.unwrap();

        assert!(occupancy.release("A1").await.unwrap());
        assert!(!occupancy.release("A1").await.unwrap());
        assert!(occupancy.current_session("A1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_if_holding_checks_session() {
        let occupancy = occupancy();
        occupancy.try_claim("A1", "S2", TTL).await.unwrap();

        assert!(!occupancy.release_if_holding("A1", "S1").await.unwrap());
        assert!(occupancy.is_busy("A1").await.unwrap());

        assert!(occupancy.release_if_holding("A1", "S2").await.unwrap());
        assert!(!occupancy.is_busy("A1").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_owner_round_trip() {
        let occupancy = occupancy();
        assert!(occupancy.session_owner("S1").await.unwrap().is_none());

        occupancy.record_owner("S1", "A1", TTL).await.unwrap();
        assert_eq!(occupancy.session_owner("S1").await.unwrap().as_deref(), Some("A1"));

        assert!(occupancy.clear_owner("S1").await.unwrap());
        assert!(occupancy.session_owner("S1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaked_claim_expires() {
        let occupancy = occupancy();
        occupancy.try_claim("A1", "S1", TTL).await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert!(!occupancy.is_busy("A1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_expiry_keeps_new_claim() {
        let occupancy = occupancy();
        occupancy.try_claim("A1", "S1", TTL).await.unwrap();

        // S1's claim lapsed and A1 moved on before the late release arrived
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert!(occupancy.try_claim("A1", "S2", TTL).await.unwrap());

        assert!(!occupancy.release_if_holding("A1", "S1").await.unwrap());
        assert_eq!(occupancy.current_session("A1").await.unwrap().as_deref(), Some("S2"));
    }
}
