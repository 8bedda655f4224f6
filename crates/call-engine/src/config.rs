//! # Voice Desk Configuration
//!
//! Configuration is grouped into sections the same way the rest of the stack does
//! it: store key layout, TTL policy, queue behaviour, server binding and token
//! issuance. Every field has a default, so a partial TOML file (or none at all)
//! is valid input.
//!
//! Values are layered with the `config` crate: the optional file first, then
//! environment variables prefixed with `VOICEDESK` using `__` as the section
//! separator, e.g. `VOICEDESK_TTL__LOCK_SECS=5`.
//!
//! ```
//! use voicedesk_call_engine::config::VoiceDeskConfig;
//!
//! let config = VoiceDeskConfig::default();
//! assert_eq!(config.ttl.lock_secs, 8);
//! assert_eq!(config.keys.lock_key("S1"), "call:voice:lock:S1");
//! config.validate().expect("defaults are valid");
//! ```
//!
//! ## TTL policy
//!
//! The lock TTL and the occupancy TTL are correctness-relevant. After a crash
//! between "lock acquired" and "occupancy claimed", the lock TTL bounds how long
//! other agents see `LOCKED`; a leaked occupancy key keeps its agent `AGENT_BUSY`
//! until the occupancy TTL runs out or an `end` clears it.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallEngineError, Result};

/// Top level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceDeskConfig {
    /// Store key names and prefixes
    pub keys: KeyConfig,
    /// Time-to-live policy
    pub ttl: TtlConfig,
    /// Waiting queue behaviour
    pub queue: QueueConfig,
    /// HTTP/WebSocket binding
    pub server: ServerConfig,
    /// Media token issuance
    pub token: TokenConfig,
}

/// Key layout inside the shared store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Sorted set holding waiting session ids scored by enqueue time
    pub waiting_zset: String,
    /// `lock:{sessionId}` -> agent attempting the claim
    pub lock_prefix: String,
    /// `active:{sessionId}` -> owning agent
    pub session_owner_prefix: String,
    /// `agent:active:{agentId}` -> owned session
    pub agent_active_prefix: String,
    /// Hash holding the session record
    pub session_prefix: String,
    /// Sorted set of agents ready to take work
    pub ready_zset: String,
    /// Sorted set of agent load counters
    pub load_zset: String,
    /// `status:{agentId}` -> agent roster status
    pub agent_status_prefix: String,
    /// `token:{sessionId}:{role}` -> cached token JSON
    pub token_cache_prefix: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            waiting_zset: "call:voice:waiting".to_string(),
            lock_prefix: "call:voice:lock:".to_string(),
            session_owner_prefix: "call:voice:active:".to_string(),
            agent_active_prefix: "call:voice:agent:active:".to_string(),
            session_prefix: "call:voice:session:".to_string(),
            ready_zset: "chat:consultant:ready".to_string(),
            load_zset: "chat:consultant:load".to_string(),
            agent_status_prefix: "chat:consultant:status:".to_string(),
            token_cache_prefix: "chat:call:token:".to_string(),
        }
    }
}

impl KeyConfig {
    pub fn lock_key(&self, session_id: &str) -> String {
        format!("{}{}", self.lock_prefix, session_id)
    }

    pub fn session_owner_key(&self, session_id: &str) -> String {
        format!("{}{}", self.session_owner_prefix, session_id)
    }

    pub fn agent_active_key(&self, agent_id: &str) -> String {
        format!("{}{}", self.agent_active_prefix, agent_id)
    }

    pub fn session_key(&self, session_id: &str) -> String {
        format!("{}{}", self.session_prefix, session_id)
    }

    pub fn agent_status_key(&self, agent_id: &str) -> String {
        format!("{}{}", self.agent_status_prefix, agent_id)
    }

    pub fn token_cache_key(&self, session_id: &str, role: &str) -> String {
        format!("{}{}:{}", self.token_cache_prefix, session_id, role)
    }
}

/// Time-to-live policy, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// Session lock lifetime; only needs to cover one accept round trip
    pub lock_secs: u64,
    /// Safety net on agent occupancy and session ownership keys
    pub occupancy_secs: u64,
    /// Retention of a session record after it has ended
    pub ended_retention_secs: u64,
    /// Media token lifetime, also used as the token cache TTL
    pub token_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            lock_secs: 8,
            occupancy_secs: 30 * 60,
            ended_retention_secs: 5 * 60,
            token_secs: 3600,
        }
    }
}

impl TtlConfig {
    pub fn lock(&self) -> Duration {
        Duration::from_secs(self.lock_secs)
    }

    pub fn occupancy(&self) -> Duration {
        Duration::from_secs(self.occupancy_secs)
    }

    pub fn ended_retention(&self) -> Duration {
        Duration::from_secs(self.ended_retention_secs)
    }

    pub fn token(&self) -> Duration {
        Duration::from_secs(self.token_secs)
    }
}

/// Waiting queue behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Page size for the agent waiting list
    pub waiting_list_limit: usize,
    /// Prefix for derived media channel names
    pub channel_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            waiting_list_limit: 50,
            channel_prefix: "voice_".to_string(),
        }
    }
}

impl QueueConfig {
    /// Deterministic media channel name for a session
    pub fn channel_for(&self, session_id: &str) -> String {
        format!("{}{}", self.channel_prefix, session_id)
    }
}

/// HTTP/WebSocket binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Trust a `consultantId` query parameter when no gateway header is present.
    /// Development only.
    pub allow_query_agent_id: bool,
    /// Period of the expired-key sweeper for the in-process store
    pub sweep_interval_secs: u64,
    /// Capacity of each push channel before events start being dropped
    pub push_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
            allow_query_agent_id: false,
            sweep_interval_secs: 30,
            push_channel_capacity: 64,
        }
    }
}

/// Media token issuance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub app_id: String,
    pub signing_secret: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            app_id: "voicedesk-dev".to_string(),
            signing_secret: "change-me".to_string(),
        }
    }
}

impl VoiceDeskConfig {
    /// Load configuration from an optional TOML file plus `VOICEDESK_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: VoiceDeskConfig = builder
            .add_source(
                config::Environment::with_prefix("VOICEDESK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the engine's invariants
    pub fn validate(&self) -> Result<()> {
        let keys = &self.keys;
        for (name, value) in [
            ("keys.waiting_zset", &keys.waiting_zset),
            ("keys.lock_prefix", &keys.lock_prefix),
            ("keys.session_owner_prefix", &keys.session_owner_prefix),
            ("keys.agent_active_prefix", &keys.agent_active_prefix),
            ("keys.session_prefix", &keys.session_prefix),
        ] {
            if value.is_empty() {
                return Err(CallEngineError::configuration(format!("{} must not be empty", name)));
            }
        }

        // Prefixes sharing a namespace would let one key kind shadow another
        let prefixes = [
            &keys.lock_prefix,
            &keys.session_owner_prefix,
            &keys.agent_active_prefix,
            &keys.session_prefix,
        ];
        for (i, a) in prefixes.iter().enumerate() {
            for b in prefixes.iter().skip(i + 1) {
                if a == b {
                    return Err(CallEngineError::configuration(format!(
                        "key prefix '{}' is used for more than one key kind",
                        a
                    )));
                }
            }
        }

        let ttl = &self.ttl;
        if ttl.lock_secs == 0 || ttl.occupancy_secs == 0 || ttl.ended_retention_secs == 0 || ttl.token_secs == 0 {
            return Err(CallEngineError::configuration("TTLs must be greater than zero"));
        }
        if ttl.lock_secs >= ttl.occupancy_secs {
            return Err(CallEngineError::configuration(
                "ttl.lock_secs must be shorter than ttl.occupancy_secs",
            ));
        }
        if self.queue.waiting_list_limit == 0 {
            return Err(CallEngineError::configuration("queue.waiting_list_limit must be at least 1"));
        }
        if self.server.push_channel_capacity == 0 {
            return Err(CallEngineError::configuration("server.push_channel_capacity must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_key_layout() {
        let keys = KeyConfig::default();
        assert_eq!(keys.session_owner_key("S1"), "call:voice:active:S1");
        assert_eq!(keys.agent_active_key("A1"), "call:voice:agent:active:A1");
        assert_eq!(keys.token_cache_key("S1", "CUSTOMER"), "chat:call:token:S1:CUSTOMER");
    }

    #[test]
    fn test_channel_name_is_deterministic() {
        let queue = QueueConfig::default();
        assert_eq!(queue.channel_for("S1"), "voice_S1");
        assert_eq!(queue.channel_for("S1"), queue.channel_for("S1"));
    }

    #[test]
    fn test_validate_rejects_bad_ttls() {
        let mut config = VoiceDeskConfig::default();
        config.ttl.lock_secs = 0;
        assert!(config.validate().is_err());

        let mut config = VoiceDeskConfig::default();
        config.ttl.lock_secs = config.ttl.occupancy_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_prefixes() {
        let mut config = VoiceDeskConfig::default();
        config.keys.lock_prefix = config.keys.session_owner_prefix.clone();
        assert!(matches!(config.validate(), Err(CallEngineError::Configuration(_))));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[ttl]\nlock_secs = 3\n\n[queue]\nchannel_prefix = \"call_\"").unwrap();

        let config = VoiceDeskConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.ttl.lock_secs, 3);
        assert_eq!(config.ttl.occupancy_secs, 1800);
        assert_eq!(config.queue.channel_for("S9"), "call_S9");
        assert_eq!(config.keys.waiting_zset, "call:voice:waiting");
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[queue]\nwaiting_list_limit = 20").unwrap();

        std::env::set_var("VOICEDESK_QUEUE__WAITING_LIST_LIMIT", "7");
        std::env::set_var("VOICEDESK_SERVER__ALLOW_QUERY_AGENT_ID", "true");
        let loaded = VoiceDeskConfig::load(Some(file.path()));
        std::env::remove_var("VOICEDESK_QUEUE__WAITING_LIST_LIMIT");
        std::env::remove_var("VOICEDESK_SERVER__ALLOW_QUERY_AGENT_ID");

        let config = loaded.unwrap();
        assert_eq!(config.queue.waiting_list_limit, 7);
        assert!(config.server.allow_query_agent_id);
        assert_eq!(config.ttl.lock_secs, 8);
    }
}
