//! # Voicedesk Call Engine
//!
//! Voice call waiting queue and session lifecycle coordinator. Customers put
//! call requests into a waiting line, exactly one agent claims each call, every
//! agent handles at most one call at a time, and tearing a call down is
//! deterministic and idempotent. State changes are pushed to agents and
//! customers in real time.
//!
//! All shared state lives in a keyed store with per-key atomic operations and
//! no multi-key transactions. The engine itself holds no in-process locks.
//!
//! ## Architecture
//!
//! ```text
//!     HTTP / WebSocket (api)
//!               │
//!   ┌───────────────────────┐        ┌────────────────────┐
//!   │ LifecycleOrchestrator │──post─▶│ NotificationFanout │──▶ agent / customer sockets
//!   └───────────────────────┘        └────────────────────┘
//!               │
//!   ┌───────────┬───────────┬────────────────┬──────────────┬───────────┐
//!   │ Waiting   │ Session   │ Agent          │ Session      │ Ready     │
//!   │ Queue     │ Lock      │ Occupancy      │ State        │ Pool      │
//!   └───────────┴───────────┴────────────────┴──────────────┴───────────┘
//!               │
//!        KeyedStore (MemoryStore)
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use voicedesk_call_engine::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let (fanout, _dispatcher) = NotificationFanout::spawn(ChannelRegistry::default());
//! let engine = LifecycleOrchestrator::new(
//!     Arc::new(MemoryStore::new()),
//!     VoiceDeskConfig::default(),
//!     fanout,
//! );
//!
//! engine.enqueue("S1").await;
//! assert!(engine.accept("S1", "A1").await.is_ok());
//! assert_eq!(
//!     engine.accept("S1", "A2").await.reason(),
//!     Some(RejectReason::NotWaiting)
//! );
//!
//! engine.end(EndRequest::by_agent("S1", "A1")).await?;
//! assert_eq!(engine.status("S1").await?.status, VoiceStatus::Ended);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod config;
pub mod logging;

// Shared store and the wrappers over it
pub mod store;
pub mod queue;
pub mod lock;
pub mod occupancy;
pub mod session;
pub mod agent;

pub mod orchestrator;
pub mod notify;
pub mod token;

// Transport and process
pub mod api;
pub mod server;

pub use error::{CallEngineError, RejectReason, Result};
pub use config::VoiceDeskConfig;
pub use orchestrator::LifecycleOrchestrator;
pub use server::{VoiceDeskServer, VoiceDeskServerBuilder};

/// Prelude module for convenient imports
///
/// ```
/// use voicedesk_call_engine::prelude::*;
/// ```
pub mod prelude {
    //! Commonly used types for embedding the engine or running the server

    pub use crate::error::{CallEngineError, RejectReason, Result};
    pub use crate::config::{KeyConfig, QueueConfig, ServerConfig, TokenConfig, TtlConfig, VoiceDeskConfig};
    pub use crate::logging::{setup_logging, LogFormat, LoggingConfig};

    pub use crate::store::{KeyedStore, MemoryStore, StoreError, StoreResult};
    pub use crate::session::{CallSession, CallStatus};

    pub use crate::orchestrator::{
        AcceptOutcome, AcceptedCall, EndAction, EndOutcome, EndRequest, EnqueueOutcome,
        LifecycleOrchestrator, StatusView, VoiceStatus, WaitingSession,
    };
    pub use crate::notify::{ChannelRegistry, NotificationFanout, PushEvent, PushEventType};
    pub use crate::token::{CallToken, CallTokenService, HmacTokenIssuer, TokenIssuer};

    pub use crate::server::{VoiceDeskServer, VoiceDeskServerBuilder};
}
