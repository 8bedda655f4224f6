//! # Session State
//!
//! One hash per session holding its status, owner, media channel and phase
//! timestamps. This record is bookkeeping: concurrency control relies on the
//! waiting queue and agent occupancy, never on this hash. Writes are therefore
//! best-effort. Store failures are logged and swallowed so they never fail the
//! caller.
//!
//! Hash layout (`call:voice:session:{sessionId}`):
//!
//! | Field             | Written by | Notes                              |
//! |-------------------|------------|------------------------------------|
//! | `status`          | all        | `WAITING` / `ASSIGNED` / `ENDED`   |
//! | `enqueuedAt`      | enqueue    | epoch ms                           |
//! | `assignedAgentId` | accept     |                                    |
//! | `channelName`     | accept     | immutable once set                 |
//! | `assignedAt`      | accept     | epoch ms                           |
//! | `endedAt`         | end        | epoch ms, write-once               |
//! | `endReason`       | end        | write-once                         |
//! | `endedBy`         | end        | write-once                         |
//!
//! The record has no TTL while waiting or assigned and a bounded retention TTL
//! once ended.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::KeyConfig;
use crate::store::{KeyedStore, StoreResult};

const F_STATUS: &str = "status";
const F_AGENT: &str = "assignedAgentId";
const F_CHANNEL: &str = "channelName";
const F_ENQUEUED_AT: &str = "enqueuedAt";
const F_ASSIGNED_AT: &str = "assignedAt";
const F_ENDED_AT: &str = "endedAt";
const F_END_REASON: &str = "endReason";
const F_ENDED_BY: &str = "endedBy";

/// Recorded lifecycle phase of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Waiting,
    Assigned,
    /// Terminal
    Ended,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Waiting => "WAITING",
            CallStatus::Assigned => "ASSIGNED",
            CallStatus::Ended => "ENDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WAITING" => Ok(CallStatus::Waiting),
            "ASSIGNED" => Ok(CallStatus::Assigned),
            "ENDED" => Ok(CallStatus::Ended),
            other => Err(format!("unknown call status '{}'", other)),
        }
    }
}

/// Snapshot of a session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub session_id: String,
    pub status: Option<CallStatus>,
    pub assigned_agent_id: Option<String>,
    pub channel_name: Option<String>,
    pub enqueued_at: Option<i64>,
    pub assigned_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub end_reason: Option<String>,
    pub ended_by: Option<String>,
}

impl CallSession {
    fn from_fields(session_id: &str, mut fields: HashMap<String, String>) -> Self {
        let mut take = |name: &str| fields.remove(name).filter(|v| !v.is_empty());
        let status = take(F_STATUS).and_then(|s| s.parse().ok());
        let assigned_agent_id = take(F_AGENT);
        let channel_name = take(F_CHANNEL);
        let enqueued_at = take(F_ENQUEUED_AT).and_then(|v| v.parse().ok());
        let assigned_at = take(F_ASSIGNED_AT).and_then(|v| v.parse().ok());
        let ended_at = take(F_ENDED_AT).and_then(|v| v.parse().ok());
        let end_reason = take(F_END_REASON);
        let ended_by = take(F_ENDED_BY);
        Self {
            session_id: session_id.to_string(),
            status,
            assigned_agent_id,
            channel_name,
            enqueued_at,
            assigned_at,
            ended_at,
            end_reason,
            ended_by,
        }
    }
}

#[derive(Clone)]
pub struct SessionState {
    store: Arc<dyn KeyedStore>,
    keys: KeyConfig,
}

impl SessionState {
    pub fn new(store: Arc<dyn KeyedStore>, keys: KeyConfig) -> Self {
        Self { store, keys }
    }

    /// Read the record, `None` if absent
    pub async fn read(&self, session_id: &str) -> StoreResult<Option<CallSession>> {
        let fields = self.store.hgetall(&self.keys.session_key(session_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(CallSession::from_fields(session_id, fields)))
    }

    /// Agent recorded on an `ASSIGNED` record
    pub async fn assigned_agent(&self, session_id: &str) -> StoreResult<Option<String>> {
        Ok(self.read(session_id).await?.and_then(|session| {
            if session.status == Some(CallStatus::Assigned) {
                session.assigned_agent_id
            } else {
                None
            }
        }))
    }

    /// Start (or restart) a waiting record.
    ///
    /// An `ENDED` record is replaced by a fresh one. An `ASSIGNED` record is left
    /// alone so the recorded lifecycle never moves backwards.
    pub async fn create_waiting(&self, session_id: &str, enqueued_at: i64) {
        let key = self.keys.session_key(session_id);
        let current = match self.store.hget(&key, F_STATUS).await {
            Ok(status) => status.and_then(|s| s.parse::<CallStatus>().ok()),
            Err(e) => {
                warn!(session_id, error = %e, "⚠️ Session record read failed, skipping waiting record");
                return;
            }
        };

        match current {
            Some(CallStatus::Assigned) => {
                warn!(session_id, "⚠️ Re-enqueued while assigned; session record left unchanged");
                return;
            }
            Some(CallStatus::Waiting) => return,
            Some(CallStatus::Ended) => {
                // New lifecycle: drop the retained record and its TTL
                if let Err(e) = self.store.del(&key).await {
                    warn!(session_id, error = %e, "⚠️ Could not drop ended session record");
                    return;
                }
            }
            None => {}
        }

        let enqueued_at = enqueued_at.to_string();
        self.write(
            session_id,
            &[(F_STATUS, CallStatus::Waiting.as_str()), (F_ENQUEUED_AT, enqueued_at.as_str())],
        )
        .await;
    }

    /// Media channel for the session: the recorded one if a higher layer already
    /// chose it, otherwise `derived`, which is then recorded.
    pub async fn resolve_channel(&self, session_id: &str, derived: String) -> String {
        let key = self.keys.session_key(session_id);
        match self.store.hget(&key, F_CHANNEL).await {
            Ok(Some(channel)) if !channel.is_empty() => return channel,
            Ok(_) => {}
            Err(e) => {
                warn!(session_id, error = %e, "⚠️ Channel lookup failed, using derived channel");
                return derived;
            }
        }
        self.write(session_id, &[(F_CHANNEL, derived.as_str())]).await;
        derived
    }

    pub async fn mark_assigned(&self, session_id: &str, agent_id: &str, channel: &str, assigned_at: i64) {
        let assigned_at = assigned_at.to_string();
        self.write(
            session_id,
            &[
                (F_STATUS, CallStatus::Assigned.as_str()),
                (F_AGENT, agent_id),
                (F_CHANNEL, channel),
                (F_ASSIGNED_AT, assigned_at.as_str()),
            ],
        )
        .await;
    }

    /// Mark the record `ENDED` (once) and start its retention TTL.
    ///
    /// Does nothing when no record exists.
    pub async fn mark_ended(
        &self,
        session_id: &str,
        ended_by: Option<&str>,
        reason: Option<&str>,
        ended_at: i64,
        retention: Duration,
    ) {
        let key = self.keys.session_key(session_id);
        let current = match self.store.hget(&key, F_STATUS).await {
            Ok(status) => status,
            Err(e) => {
                warn!(session_id, error = %e, "⚠️ end: session record read failed");
                return;
            }
        };
        let exists = match &current {
            Some(_) => true,
            None => self.store.exists(&key).await.unwrap_or(false),
        };
        if !exists {
            debug!(session_id, "No session record to finalize");
            return;
        }

        let already_ended = current
            .and_then(|s| s.parse::<CallStatus>().ok())
            .map_or(false, |s| s.is_terminal());
        if !already_ended {
            let ended_at = ended_at.to_string();
            self.write(
                session_id,
                &[
                    (F_STATUS, CallStatus::Ended.as_str()),
                    (F_ENDED_AT, ended_at.as_str()),
                    (F_END_REASON, reason.unwrap_or("")),
                    (F_ENDED_BY, ended_by.unwrap_or("")),
                ],
            )
            .await;
        }
        self.expire_soon(session_id, retention).await;
    }

    /// Bound the record's retention
    pub async fn expire_soon(&self, session_id: &str, ttl: Duration) {
        if let Err(e) = self.store.expire(&self.keys.session_key(session_id), ttl).await {
            warn!(session_id, error = %e, "⚠️ Could not set session retention TTL");
        }
    }

    async fn write(&self, session_id: &str, fields: &[(&str, &str)]) {
        if let Err(e) = self.store.hset_many(&self.keys.session_key(session_id), fields).await {
            warn!(session_id, error = %e, "⚠️ Session record update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn state() -> (SessionState, MemoryStore) {
        let store = MemoryStore::new();
        (SessionState::new(Arc::new(store.clone()), KeyConfig::default()), store)
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("assigned".parse::<CallStatus>().unwrap(), CallStatus::Assigned);
        assert_eq!(" ENDED ".parse::<CallStatus>().unwrap(), CallStatus::Ended);
        assert!("CALL_RINGING".parse::<CallStatus>().is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_fields() {
        let (state, store) = state();
        state.create_waiting("S1", 100).await;
        state.mark_assigned("S1", "A1", "voice_S1", 200).await;

        let session = state.read("S1").await.unwrap().unwrap();
        assert_eq!(session.status, Some(CallStatus::Assigned));
        assert_eq!(session.assigned_agent_id.as_deref(), Some("A1"));
        assert_eq!(session.enqueued_at, Some(100));
        assert_eq!(session.assigned_at, Some(200));
        assert!(store.ttl("call:voice:session:S1").is_none());

        assert_eq!(state.assigned_agent("S1").await.unwrap().as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_mark_ended_is_write_once() {
        let (state, store) = state();
        state.mark_assigned("S1", "A1", "voice_S1", 200).await;

        let retention = Duration::from_secs(300);
        state.mark_ended("S1", Some("A1"), Some("AGENT_END"), 300, retention).await;
        state.mark_ended("S1", Some("CUSTOMER"), Some("CUSTOMER_END"), 400, retention).await;

        let session = state.read("S1").await.unwrap().unwrap();
        assert_eq!(session.status, Some(CallStatus::Ended));
        assert_eq!(session.ended_at, Some(300));
        assert_eq!(session.end_reason.as_deref(), Some("AGENT_END"));
        assert_eq!(session.ended_by.as_deref(), Some("A1"));
        assert!(store.ttl("call:voice:session:S1").is_some());

        // ended records no longer report an owner
        assert!(state.assigned_agent("S1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_ended_without_record_creates_nothing() {
        let (state, store) = state();
        state.mark_ended("ghost", None, None, 1, Duration::from_secs(300)).await;
        assert!(state.read("ghost").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_reenqueue_after_end_starts_fresh_record() {
        let (state, store) = state();
        state.mark_assigned("S1", "A1", "voice_S1", 200).await;
        state.mark_ended("S1", Some("A1"), None, 300, Duration::from_secs(300)).await;

        state.create_waiting("S1", 500).await;
        let session = state.read("S1").await.unwrap().unwrap();
        assert_eq!(session.status, Some(CallStatus::Waiting));
        assert_eq!(session.enqueued_at, Some(500));
        assert!(session.assigned_agent_id.is_none());
        assert!(store.ttl("call:voice:session:S1").is_none());
    }

    #[tokio::test]
    async fn test_reenqueue_while_assigned_keeps_record() {
        let (state, _store) = state();
        state.mark_assigned("S1", "A1", "voice_S1", 200).await;
        state.create_waiting("S1", 500).await;

        let session = state.read("S1").await.unwrap().unwrap();
        assert_eq!(session.status, Some(CallStatus::Assigned));
    }

    #[tokio::test]
    async fn test_resolve_channel_prefers_recorded_channel() {
        let (state, store) = state();
        assert_eq!(state.resolve_channel("S1", "voice_S1".into()).await, "voice_S1");

        store
            .hset_many("call:voice:session:S2", &[("channelName", "custom-room")])
            .await
            .unwrap();
        assert_eq!(state.resolve_channel("S2", "voice_S2".into()).await, "custom-room");
    }
}
