//! # Notification Fan-out
//!
//! State changes are pushed to live agent and customer channels by message
//! passing. The orchestrator holds a [`NotificationFanout`] handle whose
//! methods post a [`FanoutCommand`] into an unbounded queue and return
//! immediately. A single [`FanoutDispatcher`] task turns each command into
//! [`PushEvent`]s and hands them to the [`ChannelRegistry`].
//!
//! Delivery is at-most-once. A channel that is missing or cannot take the
//! event is logged and skipped; nothing is retried and nothing flows back to
//! the orchestrator.
//!
//! | Command    | Customer (`sessionId`)        | Accepting agent  | All agents       |
//! |------------|-------------------------------|------------------|------------------|
//! | `enqueued` |                               |                  | `VOICE_ENQUEUED` |
//! | `accepted` | `VOICE_ACCEPTED` with channel | `CALL_ASSIGNED`  | `VOICE_ACCEPTED` |
//! | `ended`    | `VOICE_ENDED`                 |                  | `VOICE_ENDED`    |

pub mod events;
pub mod registry;

pub use events::{PushEvent, PushEventType};
pub use registry::{ChannelRegistry, Delivery, Registration};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Work item for the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum FanoutCommand {
    Enqueued {
        session_id: String,
        at: i64,
    },
    Accepted {
        session_id: String,
        agent_id: String,
        channel: String,
        at: i64,
    },
    Ended {
        session_id: String,
        ended_by: Option<String>,
        at: i64,
    },
}

#[derive(Debug, Default)]
struct FanoutCounters {
    commands: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutStats {
    pub commands: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Cheap, clonable sender side of the fan-out
#[derive(Debug, Clone)]
pub struct NotificationFanout {
    tx: mpsc::UnboundedSender<FanoutCommand>,
    counters: Arc<FanoutCounters>,
}

impl NotificationFanout {
    /// Create the handle and its dispatcher. The dispatcher must be run (or
    /// spawned) for anything to be delivered.
    pub fn new(registry: ChannelRegistry) -> (Self, FanoutDispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(FanoutCounters::default());
        (
            Self {
                tx,
                counters: counters.clone(),
            },
            FanoutDispatcher {
                rx,
                registry,
                counters,
            },
        )
    }

    /// Create the handle and spawn its dispatcher on the current runtime
    pub fn spawn(registry: ChannelRegistry) -> (Self, JoinHandle<()>) {
        let (fanout, dispatcher) = Self::new(registry);
        (fanout, tokio::spawn(dispatcher.run()))
    }

    pub fn enqueued(&self, session_id: &str) {
        self.post(FanoutCommand::Enqueued {
            session_id: session_id.to_string(),
            at: Utc::now().timestamp_millis(),
        });
    }

    pub fn accepted(&self, session_id: &str, agent_id: &str, channel: &str) {
        self.post(FanoutCommand::Accepted {
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            channel: channel.to_string(),
            at: Utc::now().timestamp_millis(),
        });
    }

    pub fn ended(&self, session_id: &str, ended_by: Option<&str>) {
        self.post(FanoutCommand::Ended {
            session_id: session_id.to_string(),
            ended_by: ended_by.map(str::to_string),
            at: Utc::now().timestamp_millis(),
        });
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            commands: self.counters.commands.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn post(&self, command: FanoutCommand) {
        if let Err(e) = self.tx.send(command) {
            debug!(command = ?e.0, "Fan-out dispatcher stopped, notification dropped");
        }
    }
}

/// Receiving side; owns delivery
pub struct FanoutDispatcher {
    rx: mpsc::UnboundedReceiver<FanoutCommand>,
    registry: ChannelRegistry,
    counters: Arc<FanoutCounters>,
}

impl FanoutDispatcher {
    /// Drain commands until every [`NotificationFanout`] handle is dropped
    pub async fn run(mut self) {
        info!("📣 Notification dispatcher started");
        while let Some(command) = self.rx.recv().await {
            self.dispatch(command);
        }
        info!("📣 Notification dispatcher stopped");
    }

    fn dispatch(&self, command: FanoutCommand) {
        self.counters.commands.fetch_add(1, Ordering::Relaxed);
        match command {
            FanoutCommand::Enqueued { session_id, at } => {
                let event = PushEvent::new(PushEventType::VoiceEnqueued, &session_id).at(at);
                self.broadcast(&event);
            }
            FanoutCommand::Accepted {
                session_id,
                agent_id,
                channel,
                at,
            } => {
                let assigned = PushEvent::new(PushEventType::CallAssigned, &session_id)
                    .with_consultant(&agent_id)
                    .with_channel(&channel)
                    .at(at);
                self.to_agent(&agent_id, &assigned);

                let accepted = PushEvent::new(PushEventType::VoiceAccepted, &session_id)
                    .with_consultant(&agent_id)
                    .at(at);
                self.broadcast(&accepted);

                self.to_customer(&session_id, &accepted.with_channel(&channel));
            }
            FanoutCommand::Ended {
                session_id,
                ended_by,
                at,
            } => {
                let mut event = PushEvent::new(PushEventType::VoiceEnded, &session_id).at(at);
                event.consultant_id = ended_by;
                self.broadcast(&event);
                self.to_customer(&session_id, &event);
            }
        }
    }

    fn broadcast(&self, event: &PushEvent) {
        let Some(payload) = encode(event) else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let results = self.registry.broadcast_agents(&payload);
        let delivered = results.iter().filter(|(_, d)| *d == Delivery::Delivered).count();
        for (agent_id, delivery) in results.iter().filter(|(_, d)| *d != Delivery::Delivered) {
            warn!(agent_id = %agent_id, ?delivery, event = event.event_type.as_str(), "⚠️ Agent push dropped");
        }
        self.record(delivered, results.len() - delivered);
        debug!(event = event.event_type.as_str(), session_id = %event.session_id, delivered, "📣 Agent broadcast");
    }

    fn to_agent(&self, agent_id: &str, event: &PushEvent) {
        let Some(payload) = encode(event) else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        self.settle(self.registry.send_to_agent(agent_id, &payload), event, agent_id, "agent");
    }

    fn to_customer(&self, session_id: &str, event: &PushEvent) {
        let Some(payload) = encode(event) else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        self.settle(self.registry.send_to_customer(session_id, &payload), event, session_id, "customer");
    }

    fn settle(&self, delivery: Delivery, event: &PushEvent, recipient: &str, kind: &str) {
        match delivery {
            Delivery::Delivered => {
                self.record(1, 0);
                debug!(recipient, kind, event = event.event_type.as_str(), "📣 Push delivered");
            }
            other => {
                self.record(0, 1);
                warn!(recipient, kind, delivery = ?other, event = event.event_type.as_str(), "⚠️ Push not delivered");
            }
        }
    }

    fn record(&self, delivered: usize, dropped: usize) {
        self.counters.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }
}

fn encode(event: &PushEvent) -> Option<String> {
    match event.to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "⚠️ Push event encoding failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(payload: &str) -> PushEvent {
        serde_json::from_str(payload).unwrap()
    }

    #[tokio::test]
    async fn test_accepted_fans_out_three_ways() {
        let registry = ChannelRegistry::new(8);
        let mut a1 = registry.register_agent("A1");
        let mut a2 = registry.register_agent("A2");
        let mut customer = registry.register_customer("S1");

        let (fanout, dispatcher) = NotificationFanout::new(registry);
        fanout.accepted("S1", "A1", "voice_S1");
        drop(fanout);
        dispatcher.run().await;

        let first = decode(&a1.receiver.recv().await.unwrap());
        let second = decode(&a1.receiver.recv().await.unwrap());
        let mut kinds = vec![first.event_type, second.event_type];
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(kinds, vec![PushEventType::CallAssigned, PushEventType::VoiceAccepted]);

        let other = decode(&a2.receiver.recv().await.unwrap());
        assert_eq!(other.event_type, PushEventType::VoiceAccepted);
        assert_eq!(other.consultant_id.as_deref(), Some("A1"));
        assert!(a2.receiver.try_recv().is_err());

        let to_customer = decode(&customer.receiver.recv().await.unwrap());
        assert_eq!(to_customer.event_type, PushEventType::VoiceAccepted);
        assert_eq!(to_customer.channel.as_deref(), Some("voice_S1"));
    }

    #[tokio::test]
    async fn test_ended_reaches_customer_and_agents() {
        let registry = ChannelRegistry::new(8);
        let mut agent = registry.register_agent("A1");
        let mut customer = registry.register_customer("S1");

        let (fanout, dispatcher) = NotificationFanout::new(registry);
        fanout.ended("S1", Some("CUSTOMER"));
        drop(fanout);
        dispatcher.run().await;

        let event = decode(&agent.receiver.recv().await.unwrap());
        assert_eq!(event.event_type, PushEventType::VoiceEnded);
        assert_eq!(event.consultant_id.as_deref(), Some("CUSTOMER"));

        let event = decode(&customer.receiver.recv().await.unwrap());
        assert_eq!(event.event_type, PushEventType::VoiceEnded);
    }

    #[tokio::test]
    async fn test_missing_channels_are_counted_not_fatal() {
        let (fanout, task) = NotificationFanout::spawn(ChannelRegistry::default());

        fanout.enqueued("S1");
        fanout.accepted("S1", "A1", "voice_S1");
        fanout.ended("S1", None);

        for _ in 0..100 {
            if fanout.stats().commands == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }

        // CALL_ASSIGNED and two customer pushes had no channel; broadcasts had no agents
        let stats = fanout.stats();
        assert_eq!(stats.commands, 3);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.dropped, 3);

        drop(fanout);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_posting_after_dispatcher_stopped_is_silent() {
        let (fanout, dispatcher) = NotificationFanout::new(ChannelRegistry::default());
        drop(dispatcher);
        fanout.enqueued("S1");
        fanout.accepted("S1", "A1", "voice_S1");
        assert_eq!(fanout.stats(), FanoutStats::default());
    }
}
