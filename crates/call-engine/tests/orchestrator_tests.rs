//! Integration tests for the lifecycle orchestrator
//!
//! These tests drive enqueue/accept/end/status against the in-memory store and
//! check the concurrency guarantees the engine makes under racing callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use voicedesk_call_engine::prelude::*;

fn create_test_engine() -> (LifecycleOrchestrator, MemoryStore) {
    let store = MemoryStore::new();
    let (fanout, _dispatcher) = NotificationFanout::new(ChannelRegistry::default());
    let engine = LifecycleOrchestrator::new(Arc::new(store.clone()), VoiceDeskConfig::default(), fanout);
    (engine, store)
}

#[tokio::test]
async fn test_second_agent_sees_not_waiting() {
    let (engine, _) = create_test_engine();

    assert!(engine.enqueue("S1").await.is_ok());
    let accepted = engine.accept("S1", "A1").await;
    assert!(accepted.is_ok());
    let call = accepted.accepted().unwrap();
    assert_eq!(call.consultant_id, "A1");
    assert_eq!(call.channel, "voice_S1");

    assert_eq!(engine.accept("S1", "A2").await.reason(), Some(RejectReason::NotWaiting));
}

#[tokio::test]
async fn test_agent_handles_one_call_at_a_time() {
    let (engine, _) = create_test_engine();

    engine.enqueue("S1").await;
    engine.enqueue("S2").await;
    assert!(engine.accept("S1", "A1").await.is_ok());
    assert_eq!(engine.accept("S2", "A1").await.reason(), Some(RejectReason::AgentBusy));

    // S2 was never touched by the busy rejection
    assert!(engine.is_waiting("S2").await.unwrap());
}

#[tokio::test]
async fn test_end_twice_is_idempotent() {
    let (engine, _) = create_test_engine();

    engine.enqueue("S1").await;
    assert!(engine.accept("S1", "A1").await.is_ok());

    let first = engine.end(EndRequest::by_agent("S1", "A1")).await.unwrap();
    assert_eq!(first.action, EndAction::Ended { owner: "A1".to_string() });
    assert_eq!(engine.status("S1").await.unwrap().status, VoiceStatus::Ended);
    assert!(!engine.occupancy().is_busy("A1").await.unwrap());

    let second = engine.end(EndRequest::by_agent("S1", "A1")).await.unwrap();
    assert_eq!(second.action, EndAction::NoOwner);
    assert_eq!(engine.status("S1").await.unwrap().status, VoiceStatus::Ended);

    let record = engine.sessions().read("S1").await.unwrap().unwrap();
    assert_eq!(record.status, Some(CallStatus::Ended));
    assert_eq!(record.ended_by.as_deref(), Some("A1"));
    assert_eq!(record.end_reason.as_deref(), Some("AGENT_END"));
}

#[tokio::test]
async fn test_unknown_session_reports_ended() {
    let (engine, _) = create_test_engine();

    let view = engine.status("S_never_seen").await.unwrap();
    assert!(view.ok);
    assert_eq!(view.status, VoiceStatus::Ended);
    assert_eq!(view.consultant_id, None);
}

#[tokio::test]
async fn test_waiting_list_is_oldest_first() {
    let (engine, _) = create_test_engine();

    engine.enqueue("S1").await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    engine.enqueue("S2").await;

    let page = engine.waiting_list(Some(1)).await.unwrap();
    assert_eq!(page, vec![WaitingSession::new("S1")]);

    let all: Vec<String> = engine
        .waiting_list(None)
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.session_id)
        .collect();
    assert_eq!(all, vec!["S1", "S2"]);
}

#[tokio::test]
async fn test_status_follows_lifecycle() {
    let (engine, _) = create_test_engine();

    engine.enqueue("S1").await;
    assert_eq!(engine.status("S1").await.unwrap().status, VoiceStatus::Waiting);

    engine.accept("S1", "A1").await;
    let view = engine.status("S1").await.unwrap();
    assert_eq!(view.status, VoiceStatus::Accepted);
    assert_eq!(view.consultant_id.as_deref(), Some("A1"));

    engine.end(EndRequest::by_customer("S1")).await.unwrap();
    assert_eq!(engine.status("S1").await.unwrap().status, VoiceStatus::Ended);
}

#[tokio::test]
async fn test_no_resurrection_after_customer_hangs_up() {
    let (engine, _) = create_test_engine();

    engine.enqueue("S1").await;
    let outcome = engine.end(EndRequest::by_customer("S1")).await.unwrap();
    assert_eq!(outcome.action, EndAction::NoOwner);

    assert_eq!(engine.accept("S1", "A1").await.reason(), Some(RejectReason::NotWaiting));
    assert_eq!(engine.accept("S1", "A2").await.reason(), Some(RejectReason::NotWaiting));

    // A fresh enqueue starts a new lifecycle
    engine.enqueue("S1").await;
    assert!(engine.accept("S1", "A1").await.is_ok());
    let record = engine.sessions().read("S1").await.unwrap().unwrap();
    assert_eq!(record.status, Some(CallStatus::Assigned));
    assert_eq!(record.ended_at, None);
}

#[tokio::test]
async fn test_end_by_other_agent_is_refused() {
    let (engine, _) = create_test_engine();

    engine.enqueue("S1").await;
    engine.accept("S1", "A1").await;

    let outcome = engine.end(EndRequest::by_agent("S1", "A2")).await.unwrap();
    assert_eq!(
        outcome.action,
        EndAction::Refused {
            recorded_owner: "A1".to_string()
        }
    );

    assert!(engine.occupancy().is_busy("A1").await.unwrap());
    let view = engine.status("S1").await.unwrap();
    assert_eq!(view.status, VoiceStatus::Accepted);
    assert_eq!(view.consultant_id.as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_end_restores_agent_to_ready_pool() {
    let (engine, store) = create_test_engine();
    let keys = KeyConfig::default();
    store.zincrby(&keys.load_zset, 1.0, "A1").await.unwrap();

    engine.enqueue("S1").await;
    engine.accept("S1", "A1").await;
    engine.end(EndRequest::by_agent("S1", "A1")).await.unwrap();

    assert_eq!(store.zscore(&keys.ready_zset, "A1").await.unwrap(), Some(0.0));
    assert_eq!(store.zscore(&keys.load_zset, "A1").await.unwrap(), Some(0.0));
    assert_eq!(
        store.get(&keys.agent_status_key("A1")).await.unwrap().as_deref(),
        Some("READY")
    );
}

#[tokio::test]
async fn test_blank_ids_are_rejected() {
    let (engine, _) = create_test_engine();

    assert_eq!(engine.enqueue("  ").await.reason(), Some(RejectReason::SessionIdRequired));
    assert_eq!(engine.accept("", "A1").await.reason(), Some(RejectReason::SessionIdRequired));
    assert_eq!(engine.accept("S1", " ").await.reason(), Some(RejectReason::ConsultantIdRequired));
    assert!(matches!(
        engine.end(EndRequest::new("")).await,
        Err(CallEngineError::InvalidInput(_))
    ));
    assert!(engine.status("").await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts_yield_one_winner() {
    for round in 0..20 {
        let (engine, _) = create_test_engine();
        let session_id = format!("S{}", round);
        engine.enqueue(&session_id).await;

        let mut handles = Vec::new();
        for agent in 0..8 {
            let engine = engine.clone();
            let session_id = session_id.clone();
            handles.push(tokio::spawn(async move {
                engine.accept(&session_id, &format!("A{}", agent)).await
            }));
        }

        let outcomes: Vec<AcceptOutcome> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let winners = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(winners, 1, "round {} had {} winners", round, winners);
        for outcome in outcomes.iter().filter(|o| !o.is_ok()) {
            assert!(matches!(
                outcome.reason(),
                Some(RejectReason::Locked) | Some(RejectReason::NotWaiting)
            ));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_agent_never_holds_two_sessions() {
    for _ in 0..20 {
        let (engine, _) = create_test_engine();
        for sid in ["S1", "S2", "S3"] {
            engine.enqueue(sid).await;
        }

        let handles: Vec<_> = ["S1", "S2", "S3"]
            .into_iter()
            .map(|sid| {
                let engine = engine.clone();
                tokio::spawn(async move { (sid, engine.accept(sid, "A1").await) })
            })
            .collect();

        let mut won = Vec::new();
        for handle in handles {
            let (sid, outcome) = handle.await.unwrap();
            if outcome.is_ok() {
                won.push(sid);
            } else {
                assert_eq!(outcome.reason(), Some(RejectReason::AgentBusy));
                // losers are either untouched or rolled back into the queue
                assert!(engine.is_waiting(sid).await.unwrap());
            }
        }
        assert_eq!(won.len(), 1);
        assert_eq!(
            engine.occupancy().current_session("A1").await.unwrap().as_deref(),
            Some(won[0])
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_reenqueue_of_accepted_call_stays_out_of_queue() {
    let (engine, _) = create_test_engine();

    engine.enqueue("S1").await;
    assert!(engine.accept("S1", "A1").await.is_ok());

    let again = engine.enqueue("S1").await;
    assert!(again.is_ok());
    assert!(!engine.is_waiting("S1").await.unwrap());
    let view = engine.status("S1").await.unwrap();
    assert_eq!(view.status, VoiceStatus::Accepted);
    assert_eq!(view.consultant_id.as_deref(), Some("A1"));

    // the claim lock has long expired; the queue is what keeps A2 out
    tokio::time::advance(Duration::from_secs(9)).await;
    assert_eq!(engine.accept("S1", "A2").await.reason(), Some(RejectReason::NotWaiting));
    assert!(!engine.occupancy().is_busy("A2").await.unwrap());
    assert_eq!(engine.accepted_agent("S1").await.unwrap().as_deref(), Some("A1"));
}

#[tokio::test(start_paused = true)]
async fn test_stale_lock_expires() {
    let (engine, store) = create_test_engine();
    let keys = KeyConfig::default();

    engine.enqueue("S1").await;
    // a claimer that died right after taking the lock
    store
        .set_nx(&keys.lock_key("S1"), "A9", Duration::from_secs(8))
        .await
        .unwrap();

    assert_eq!(engine.accept("S1", "A1").await.reason(), Some(RejectReason::Locked));

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(engine.accept("S1", "A1").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_call_frees_agent_after_occupancy_ttl() {
    let (engine, _) = create_test_engine();

    engine.enqueue("S1").await;
    engine.accept("S1", "A1").await;
    assert!(engine.occupancy().is_busy("A1").await.unwrap());

    tokio::time::advance(Duration::from_secs(30 * 60 + 1)).await;
    assert!(!engine.occupancy().is_busy("A1").await.unwrap());

    engine.enqueue("S2").await;
    assert!(engine.accept("S2", "A1").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_ended_record_expires_after_retention() {
    let (engine, store) = create_test_engine();
    let key = KeyConfig::default().session_key("S1");

    engine.enqueue("S1").await;
    engine.accept("S1", "A1").await;
    engine.end(EndRequest::by_agent("S1", "A1")).await.unwrap();
    assert!(store.exists(&key).await.unwrap());

    tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;
    assert!(!store.exists(&key).await.unwrap());
}

const CLAIM_OK: u8 = 0;
const CLAIM_REFUSE: u8 = 1;
const CLAIM_ERROR: u8 = 2;

/// Store that can make agent occupancy claims fail after the queue step
struct FlakyClaimStore {
    inner: MemoryStore,
    agent_prefix: String,
    mode: AtomicU8,
}

impl FlakyClaimStore {
    fn new(mode: u8) -> Self {
        Self {
            inner: MemoryStore::new(),
            agent_prefix: KeyConfig::default().agent_active_prefix,
            mode: AtomicU8::new(mode),
        }
    }
}

#[async_trait]
impl KeyedStore for FlakyClaimStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        if key.starts_with(&self.agent_prefix) {
            match self.mode.load(Ordering::SeqCst) {
                CLAIM_REFUSE => return Ok(false),
                CLAIM_ERROR => {
                    // the write lands but the reply is lost
                    self.inner.set_nx(key, value, ttl).await?;
                    return Err(StoreError::Unavailable("connection reset".to_string()));
                }
                _ => {}
            }
        }
        self.inner.set_nx(key, value, ttl).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.inner.del(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn hset_many(&self, key: &str, fields: &[(&str, &str)]) -> StoreResult<()> {
        self.inner.hset_many(key, fields).await
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.inner.hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<bool> {
        self.inner.zadd(key, score, member).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.zrem(key, member).await
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.inner.zrange(key, start, stop).await
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.inner.zscore(key, member).await
    }

    async fn zincrby(&self, key: &str, delta: f64, member: &str) -> StoreResult<f64> {
        self.inner.zincrby(key, delta, member).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

fn engine_over(store: Arc<FlakyClaimStore>) -> LifecycleOrchestrator {
    let (fanout, _dispatcher) = NotificationFanout::new(ChannelRegistry::default());
    LifecycleOrchestrator::new(store, VoiceDeskConfig::default(), fanout)
}

#[tokio::test]
async fn test_refused_claim_rolls_session_back() {
    let store = Arc::new(FlakyClaimStore::new(CLAIM_REFUSE));
    let engine = engine_over(store.clone());

    engine.enqueue("S1").await;
    assert_eq!(engine.accept("S1", "A1").await.reason(), Some(RejectReason::AgentBusy));

    assert!(engine.is_waiting("S1").await.unwrap());
    assert_eq!(engine.accepted_agent("S1").await.unwrap(), None);
    assert_eq!(engine.status("S1").await.unwrap().status, VoiceStatus::Waiting);
}

#[tokio::test]
async fn test_failed_claim_releases_and_rolls_back() {
    let store = Arc::new(FlakyClaimStore::new(CLAIM_ERROR));
    let engine = engine_over(store.clone());

    engine.enqueue("S1").await;
    assert_eq!(
        engine.accept("S1", "A1").await.reason(),
        Some(RejectReason::StoreUnavailable)
    );

    assert!(engine.is_waiting("S1").await.unwrap());
    assert!(!engine.occupancy().is_busy("A1").await.unwrap());

    // the lock from the failed attempt is still held until its TTL runs out
    store.mode.store(CLAIM_OK, Ordering::SeqCst);
    assert_eq!(engine.accept("S1", "A2").await.reason(), Some(RejectReason::Locked));
    engine.end(EndRequest::by_customer("S1")).await.unwrap();
    assert!(!engine.is_waiting("S1").await.unwrap());
}
