//! Core lifecycle orchestration
//!
//! This module contains [`LifecycleOrchestrator`], the state machine that moves a
//! voice call through `WAITING -> ASSIGNED -> ENDED` on top of the shared keyed
//! store. It holds no in-process locks: every mutual exclusion decision is an
//! atomic per-key store operation, executed in a fixed order per request.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::agent::ReadyPool;
use crate::config::VoiceDeskConfig;
use crate::error::{CallEngineError, RejectReason, Result};
use crate::lock::SessionLock;
use crate::notify::NotificationFanout;
use crate::occupancy::AgentOccupancy;
use crate::queue::WaitingQueue;
use crate::session::SessionState;
use crate::store::{KeyedStore, StoreError};

use super::types::{
    AcceptOutcome, AcceptedCall, EndAction, EndOutcome, EndRequest, EnqueueOutcome, StatusView,
    VoiceStatus, WaitingSession,
};

/// Voice call lifecycle coordinator
///
/// Composes the waiting queue, the per-session claim lock, per-agent occupancy
/// and the session record. Business outcomes (busy, locked, not waiting) come
/// back as data; only malformed input on `end` and `status` is an `Err`.
///
/// # Accept
///
/// ```text
///  isBusy(agent) ──yes──▶ AGENT_BUSY
///       │ no
///  lock(session) ──denied──▶ LOCKED
///       │ granted
///  queue.remove ──absent──▶ NOT_WAITING          (lock left to expire)
///       │ removed
///  claim(agent) ──denied──▶ re-enqueue, AGENT_BUSY
///       │ claimed
///  record owner, mark ASSIGNED, notify ──▶ ok
/// ```
///
/// The queue removal decides the winner between concurrent claims. The lock
/// only keeps two callers from attempting that removal at the same instant.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use voicedesk_call_engine::prelude::*;
///
/// # async fn example() {
/// let (fanout, _dispatcher) = NotificationFanout::spawn(ChannelRegistry::default());
/// let orchestrator = LifecycleOrchestrator::new(
///     Arc::new(MemoryStore::new()),
///     VoiceDeskConfig::default(),
///     fanout,
/// );
///
/// orchestrator.enqueue("S1").await;
/// let outcome = orchestrator.accept("S1", "A1").await;
/// assert!(outcome.is_ok());
/// # }
/// ```
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    config: Arc<VoiceDeskConfig>,
    store: Arc<dyn KeyedStore>,
    queue: WaitingQueue,
    lock: SessionLock,
    occupancy: AgentOccupancy,
    sessions: SessionState,
    ready_pool: ReadyPool,
    fanout: NotificationFanout,
}

impl LifecycleOrchestrator {
    pub fn new(store: Arc<dyn KeyedStore>, config: VoiceDeskConfig, fanout: NotificationFanout) -> Self {
        let keys = config.keys.clone();
        Self {
            queue: WaitingQueue::new(store.clone(), keys.waiting_zset.clone()),
            lock: SessionLock::new(store.clone(), keys.clone()),
            occupancy: AgentOccupancy::new(store.clone(), keys.clone()),
            sessions: SessionState::new(store.clone(), keys.clone()),
            ready_pool: ReadyPool::new(store.clone(), keys),
            config: Arc::new(config),
            store,
            fanout,
        }
    }

    pub fn config(&self) -> &VoiceDeskConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyedStore> {
        &self.store
    }

    pub fn queue(&self) -> &WaitingQueue {
        &self.queue
    }

    pub fn occupancy(&self) -> &AgentOccupancy {
        &self.occupancy
    }

    pub fn sessions(&self) -> &SessionState {
        &self.sessions
    }

    pub fn fanout(&self) -> &NotificationFanout {
        &self.fanout
    }

    /// Admit a call request into the waiting queue.
    ///
    /// Repeated enqueues of the same id refresh its position. An id that an
    /// agent already owns is acknowledged without re-entering the queue.
    pub async fn enqueue(&self, session_id: &str) -> EnqueueOutcome {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return EnqueueOutcome::Rejected(RejectReason::SessionIdRequired);
        }

        match self.occupancy.session_owner(session_id).await {
            Ok(None) => {}
            Ok(Some(owner)) => {
                info!(session_id, owner = %owner, "📥 Enqueue ignored: call already accepted");
                return EnqueueOutcome::Enqueued {
                    session_id: session_id.to_string(),
                };
            }
            Err(e) => {
                return EnqueueOutcome::Rejected(self.critical_failure("owner check", session_id, &e));
            }
        }

        let enqueued_at = match self.queue.enqueue(session_id).await {
            Ok(at) => at,
            Err(e) => {
                return EnqueueOutcome::Rejected(self.critical_failure("enqueue", session_id, &e));
            }
        };

        self.sessions.create_waiting(session_id, enqueued_at).await;
        self.fanout.enqueued(session_id);

        info!(session_id, "📥 Voice call enqueued");
        EnqueueOutcome::Enqueued {
            session_id: session_id.to_string(),
        }
    }

    /// Claim a waiting session for an agent.
    ///
    /// Exactly one of several concurrent accepts on the same session succeeds.
    pub async fn accept(&self, session_id: &str, agent_id: &str) -> AcceptOutcome {
        let session_id = session_id.trim();
        let agent_id = agent_id.trim();
        if session_id.is_empty() {
            return AcceptOutcome::Rejected(RejectReason::SessionIdRequired);
        }
        if agent_id.is_empty() {
            return AcceptOutcome::Rejected(RejectReason::ConsultantIdRequired);
        }
        let ttl = &self.config.ttl;

        match self.occupancy.is_busy(agent_id).await {
            Ok(false) => {}
            Ok(true) => return self.reject(session_id, agent_id, RejectReason::AgentBusy),
            Err(e) => return AcceptOutcome::Rejected(self.critical_failure("occupancy check", session_id, &e)),
        }

        // Never released here: it expires after `ttl.lock` or is cleared by `end`
        match self.lock.try_acquire(session_id, agent_id, ttl.lock()).await {
            Ok(true) => {}
            Ok(false) => return self.reject(session_id, agent_id, RejectReason::Locked),
            Err(e) => return AcceptOutcome::Rejected(self.critical_failure("lock acquire", session_id, &e)),
        }

        match self.queue.remove(session_id).await {
            Ok(true) => {}
            Ok(false) => return self.reject(session_id, agent_id, RejectReason::NotWaiting),
            Err(e) => return AcceptOutcome::Rejected(self.critical_failure("queue remove", session_id, &e)),
        }

        match self.occupancy.try_claim(agent_id, session_id, ttl.occupancy()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(session_id, agent_id, "🔁 Agent claimed elsewhere after busy check, rolling back");
                self.requeue(session_id).await;
                return AcceptOutcome::Rejected(RejectReason::AgentBusy);
            }
            Err(e) => {
                // The claim may have landed before the failure surfaced
                if let Err(release_err) = self.occupancy.release_if_holding(agent_id, session_id).await {
                    warn!(session_id, agent_id, error = %release_err, "⚠️ Could not verify agent claim during rollback");
                }
                self.requeue(session_id).await;
                return AcceptOutcome::Rejected(self.critical_failure("occupancy claim", session_id, &e));
            }
        }

        let accepted_at = Utc::now().timestamp_millis();
        if let Err(e) = self.occupancy.record_owner(session_id, agent_id, ttl.occupancy()).await {
            warn!(session_id, agent_id, error = %e, "⚠️ Could not record session owner");
        }
        let channel = self
            .sessions
            .resolve_channel(session_id, self.config.queue.channel_for(session_id))
            .await;
        self.sessions
            .mark_assigned(session_id, agent_id, &channel, accepted_at)
            .await;
        self.fanout.accepted(session_id, agent_id, &channel);

        info!(session_id, agent_id, channel = %channel, "✅ Voice call accepted");
        AcceptOutcome::Accepted(AcceptedCall {
            session_id: session_id.to_string(),
            consultant_id: agent_id.to_string(),
            channel,
            accepted_at,
        })
    }

    /// Terminate a session. Safe to call repeatedly and from any trigger point.
    ///
    /// Only an empty session id is an error. A call whose supplied agent is not
    /// the recorded owner is left untouched and still reported as `ok`.
    pub async fn end(&self, request: EndRequest) -> Result<EndOutcome> {
        let session_id = request.session_id.trim();
        if session_id.is_empty() {
            return Err(CallEngineError::invalid_input("sessionId is required"));
        }
        let claimed_agent = non_blank(request.agent_id.as_deref());
        let ended_by = non_blank(request.ended_by.as_deref());
        let reason = non_blank(request.reason.as_deref());

        // A session that was never accepted may still be waiting
        match self.queue.remove(session_id).await {
            Ok(true) => debug!(session_id, "Removed ended session from waiting queue"),
            Ok(false) => {}
            Err(e) => warn!(session_id, error = %e, "⚠️ end: waiting queue cleanup failed"),
        }

        let action = match self.recorded_owner(session_id).await {
            None => {
                if let Some(agent_id) = claimed_agent {
                    self.release_agent(agent_id, session_id).await;
                }
                self.clear_lock(session_id).await;
                EndAction::NoOwner
            }
            Some(owner) if claimed_agent.map_or(false, |agent| agent != owner) => {
                info!(
                    session_id,
                    agent_id = claimed_agent.unwrap_or_default(),
                    recorded_owner = %owner,
                    "🚫 end refused: agent does not own this call"
                );
                return Ok(EndOutcome {
                    session_id: session_id.to_string(),
                    action: EndAction::Refused { recorded_owner: owner },
                });
            }
            Some(owner) => {
                self.release_agent(&owner, session_id).await;
                if let Err(e) = self.occupancy.clear_owner(session_id).await {
                    warn!(session_id, error = %e, "⚠️ end: session owner cleanup failed");
                }
                self.clear_lock(session_id).await;
                EndAction::Ended { owner }
            }
        };

        self.sessions
            .mark_ended(
                session_id,
                ended_by,
                reason,
                Utc::now().timestamp_millis(),
                self.config.ttl.ended_retention(),
            )
            .await;
        self.fanout.ended(session_id, ended_by);

        info!(session_id, ?action, ended_by, reason, "📴 Voice call ended");
        Ok(EndOutcome {
            session_id: session_id.to_string(),
            action,
        })
    }

    /// Three-valued status: `WAITING`, then `ACCEPTED`, otherwise `ENDED`.
    ///
    /// An id that was never enqueued also reports `ENDED`.
    pub async fn status(&self, session_id: &str) -> Result<StatusView> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(CallEngineError::invalid_input("sessionId is required"));
        }

        if self.is_waiting(session_id).await? {
            return Ok(StatusView::new(session_id, VoiceStatus::Waiting, None));
        }
        if let Some(agent_id) = self.accepted_agent(session_id).await? {
            return Ok(StatusView::new(session_id, VoiceStatus::Accepted, Some(agent_id)));
        }
        Ok(StatusView::new(session_id, VoiceStatus::Ended, None))
    }

    pub async fn is_waiting(&self, session_id: &str) -> Result<bool> {
        Ok(self.queue.contains(session_id).await?)
    }

    /// Agent currently owning the session, if any
    pub async fn accepted_agent(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self.occupancy.session_owner(session_id).await?)
    }

    /// Oldest waiting sessions first. `None` uses the configured default limit.
    pub async fn waiting_list(&self, limit: Option<usize>) -> Result<Vec<WaitingSession>> {
        let limit = limit.unwrap_or(self.config.queue.waiting_list_limit);
        Ok(self
            .queue
            .list(limit)
            .await?
            .into_iter()
            .map(WaitingSession::new)
            .collect())
    }

    async fn recorded_owner(&self, session_id: &str) -> Option<String> {
        match self.occupancy.session_owner(session_id).await {
            Ok(Some(owner)) => return Some(owner),
            Ok(None) => {}
            Err(e) => warn!(session_id, error = %e, "⚠️ end: session owner lookup failed"),
        }
        match self.sessions.assigned_agent(session_id).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(session_id, error = %e, "⚠️ end: session record lookup failed");
                None
            }
        }
    }

    /// Free the agent if it still holds this session, then return it to the ready pool
    async fn release_agent(&self, agent_id: &str, session_id: &str) {
        match self.occupancy.release_if_holding(agent_id, session_id).await {
            Ok(true) => {
                debug!(session_id, agent_id, "🔓 Agent released");
                self.ready_pool.restore_ready(agent_id).await;
            }
            Ok(false) => {}
            Err(e) => warn!(session_id, agent_id, error = %e, "⚠️ end: agent release failed"),
        }
    }

    async fn clear_lock(&self, session_id: &str) {
        if let Err(e) = self.lock.clear(session_id).await {
            warn!(session_id, error = %e, "⚠️ end: session lock cleanup failed");
        }
    }

    async fn requeue(&self, session_id: &str) {
        if let Err(e) = self.queue.enqueue(session_id).await {
            error!(session_id, error = %e, "❌ Rollback failed: session left out of the waiting queue");
        }
    }

    fn reject(&self, session_id: &str, agent_id: &str, reason: RejectReason) -> AcceptOutcome {
        debug!(session_id, agent_id, %reason, "accept rejected");
        AcceptOutcome::Rejected(reason)
    }

    fn critical_failure(&self, step: &str, session_id: &str, e: &StoreError) -> RejectReason {
        error!(session_id, step, error = %e, "❌ Store failure on critical path");
        RejectReason::StoreUnavailable
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
