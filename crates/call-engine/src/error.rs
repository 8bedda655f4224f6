//! # Error Types for the Voice Call Engine
//!
//! Two layers of failure exist in this crate and they are kept apart on purpose:
//!
//! - [`CallEngineError`] is a hard failure: malformed input on a programming
//!   contract, an unusable configuration, or a store failure that a caller has to
//!   see. It travels through `Result`.
//! - [`RejectReason`] is an expected business outcome (agent busy, session
//!   locked, session not waiting). It is returned as data inside the outcome
//!   types of the orchestrator and never as an `Err`.
//!
//! ```
//! use voicedesk_call_engine::error::{CallEngineError, RejectReason};
//!
//! let err = CallEngineError::invalid_input("sessionId is required");
//! assert_eq!(err.to_string(), "Invalid input: sessionId is required");
//! assert_eq!(RejectReason::AgentBusy.as_str(), "AGENT_BUSY");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Hard failures raised by the call engine.
#[derive(Error, Debug)]
pub enum CallEngineError {
    /// Keyed store failure that could not be absorbed by the caller
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Input violated a programming contract (e.g. an empty session id on `end`)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Media token issuance failed
    #[error("Token error: {0}")]
    Token(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallEngineError {
    /// Create a new Store error wrapping a backend failure message
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(StoreError::Backend(msg.into()))
    }

    /// Create a new InvalidInput error with the provided message
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Configuration error with the provided message
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new Token error with the provided message
    pub fn token<S: Into<String>>(msg: S) -> Self {
        Self::Token(msg.into())
    }

    /// Create a new Internal error with the provided message
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<config::ConfigError> for CallEngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type for call engine operations
pub type Result<T> = std::result::Result<T, CallEngineError>;

/// Business rejection codes returned by `enqueue` and `accept`.
///
/// The wire form is the upper snake case name, e.g. `"NOT_WAITING"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// The session id was empty
    SessionIdRequired,
    /// The agent (consultant) id was empty
    ConsultantIdRequired,
    /// The agent already owns an active call
    AgentBusy,
    /// Another agent is mid-claim on the same session
    Locked,
    /// The session is not in the waiting queue
    NotWaiting,
    /// A critical store operation failed; nothing was committed
    StoreUnavailable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::SessionIdRequired => "SESSION_ID_REQUIRED",
            RejectReason::ConsultantIdRequired => "CONSULTANT_ID_REQUIRED",
            RejectReason::AgentBusy => "AGENT_BUSY",
            RejectReason::Locked => "LOCKED",
            RejectReason::NotWaiting => "NOT_WAITING",
            RejectReason::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    /// Whether a caller may retry the same request after a short delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RejectReason::AgentBusy | RejectReason::Locked | RejectReason::StoreUnavailable
        )
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_wire_names() {
        let json = serde_json::to_string(&RejectReason::ConsultantIdRequired).unwrap();
        assert_eq!(json, "\"CONSULTANT_ID_REQUIRED\"");

        let parsed: RejectReason = serde_json::from_str("\"NOT_WAITING\"").unwrap();
        assert_eq!(parsed, RejectReason::NotWaiting);

        for reason in [
            RejectReason::SessionIdRequired,
            RejectReason::ConsultantIdRequired,
            RejectReason::AgentBusy,
            RejectReason::Locked,
            RejectReason::NotWaiting,
            RejectReason::StoreUnavailable,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_retryable_reasons() {
        assert!(RejectReason::Locked.is_retryable());
        assert!(RejectReason::AgentBusy.is_retryable());
        assert!(!RejectReason::NotWaiting.is_retryable());
        assert!(!RejectReason::SessionIdRequired.is_retryable());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: CallEngineError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, CallEngineError::Store(_)));
        assert!(err.to_string().contains("connection refused"));
    }
}
