//! Live push channel registry.
//!
//! Local to the process and rebuilt as sockets reconnect. Agents are keyed by
//! agent id, customers by session id. A new registration under the same key
//! replaces the old one; the old receiver then sees its channel close.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Result of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    NotConnected,
    /// Channel buffer full, payload dropped
    Full,
    /// Receiver gone, slot removed
    Closed,
}

/// Receiving half handed to the socket task
#[derive(Debug)]
pub struct Registration {
    pub connection_id: Uuid,
    pub receiver: mpsc::Receiver<String>,
}

#[derive(Debug)]
struct Slot {
    connection_id: Uuid,
    tx: mpsc::Sender<String>,
}

#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    agents: Arc<DashMap<String, Slot>>,
    customers: Arc<DashMap<String, Slot>>,
    capacity: usize,
}

impl ChannelRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            agents: Arc::new(DashMap::new()),
            customers: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn register_agent(&self, agent_id: &str) -> Registration {
        let registration = register(&self.agents, agent_id, self.capacity);
        debug!(agent_id, connection_id = %registration.connection_id, "🔌 Agent push channel registered");
        registration
    }

    pub fn register_customer(&self, session_id: &str) -> Registration {
        let registration = register(&self.customers, session_id, self.capacity);
        debug!(session_id, connection_id = %registration.connection_id, "🔌 Customer push channel registered");
        registration
    }

    /// Remove the agent's slot only if it still belongs to `connection_id`
    pub fn unregister_agent(&self, agent_id: &str, connection_id: Uuid) -> bool {
        self.agents
            .remove_if(agent_id, |_, slot| slot.connection_id == connection_id)
            .is_some()
    }

    pub fn unregister_customer(&self, session_id: &str, connection_id: Uuid) -> bool {
        self.customers
            .remove_if(session_id, |_, slot| slot.connection_id == connection_id)
            .is_some()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    pub fn is_agent_connected(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn is_customer_connected(&self, session_id: &str) -> bool {
        self.customers.contains_key(session_id)
    }

    pub fn send_to_agent(&self, agent_id: &str, payload: &str) -> Delivery {
        deliver(&self.agents, agent_id, payload)
    }

    pub fn send_to_customer(&self, session_id: &str, payload: &str) -> Delivery {
        deliver(&self.customers, session_id, payload)
    }

    /// Push to every registered agent. Returns one result per agent.
    pub fn broadcast_agents(&self, payload: &str) -> Vec<(String, Delivery)> {
        let mut results = Vec::with_capacity(self.agents.len());
        let mut closed = Vec::new();

        for slot in self.agents.iter() {
            let outcome = try_push(slot.value(), payload);
            if outcome == Delivery::Closed {
                closed.push((slot.key().clone(), slot.value().connection_id));
            }
            results.push((slot.key().clone(), outcome));
        }

        // shard guards are released once iteration ends
        for (agent_id, connection_id) in closed {
            self.unregister_agent(&agent_id, connection_id);
        }
        results
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

fn register(map: &DashMap<String, Slot>, key: &str, capacity: usize) -> Registration {
    let (tx, receiver) = mpsc::channel(capacity);
    let connection_id = Uuid::new_v4();
    map.insert(key.to_string(), Slot { connection_id, tx });
    Registration {
        connection_id,
        receiver,
    }
}

fn deliver(map: &DashMap<String, Slot>, key: &str, payload: &str) -> Delivery {
    let outcome = match map.get(key) {
        Some(slot) => (try_push(&slot, payload), slot.connection_id),
        None => return Delivery::NotConnected,
    };
    if let (Delivery::Closed, connection_id) = outcome {
        map.remove_if(key, |_, slot| slot.connection_id == connection_id);
    }
    outcome.0
}

fn try_push(slot: &Slot, payload: &str) -> Delivery {
    match slot.tx.try_send(payload.to_string()) {
        Ok(()) => Delivery::Delivered,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
    }
}
