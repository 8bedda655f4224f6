//! # Voice Call Orchestration Module
//!
//! The orchestrator owns the voice call state machine and every invariant that
//! spans more than one store key. Request handlers call into it; it calls the
//! store wrappers in a fixed order and posts notifications as a side effect.
//!
//! ## Module Organization
//!
//! - **[`core`]**: [`LifecycleOrchestrator`] with `enqueue`, `accept`, `end`
//!   and the status queries
//! - **[`types`]**: request and outcome types and their wire forms
//!
//! ## State Machine
//!
//! ```text
//!            enqueue              accept                end
//!  (none) ───────────▶ WAITING ───────────▶ ASSIGNED ───────────▶ ENDED
//!                         │                                        ▲
//!                         └──────────────── end ───────────────────┘
//! ```
//!
//! `ENDED` is terminal and may be re-entered any number of times. A session
//! with no record at all is treated as already ended.
//!
//! ## Invariants
//!
//! - A session is assigned to at most one agent
//! - An agent owns at most one session
//! - A waiting session never appears in agent occupancy
//! - Removing an absent id from the waiting queue is a no-op
//!
//! ## Failure Handling
//!
//! Busy, locked and not-waiting outcomes are returned as [`RejectReason`]s.
//! A store failure on a conditional step (lock, queue removal, occupancy claim)
//! rejects the request with `STORE_UNAVAILABLE` after undoing the queue removal
//! if it already happened. Failures while writing the session record or
//! delivering notifications are logged and never reach the caller.
//!
//! [`RejectReason`]: crate::error::RejectReason

pub mod core;
pub mod types;

pub use self::core::LifecycleOrchestrator;
pub use self::types::{
    AcceptOutcome, AcceptedCall, EndAction, EndOutcome, EndRequest, EnqueueOutcome, StatusView,
    VoiceStatus, WaitingSession, ENDED_BY_CUSTOMER, ENDED_BY_SYSTEM, REASON_AGENT_END,
    REASON_CUSTOMER_END,
};
