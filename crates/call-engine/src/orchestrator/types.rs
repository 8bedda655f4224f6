//! Request and outcome types for the lifecycle orchestrator.
//!
//! Outcomes serialize to the response bodies of the HTTP binding:
//! `{ok:true, ...}` on success and `{ok:false, reason}` on a business rejection.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::RejectReason;

/// `endedBy` value when the customer hangs up
pub const ENDED_BY_CUSTOMER: &str = "CUSTOMER";
/// `endedBy` value for housekeeping triggers
pub const ENDED_BY_SYSTEM: &str = "SYSTEM";

/// `endReason` when an agent ends the call
pub const REASON_AGENT_END: &str = "AGENT_END";
/// `endReason` when the customer ends the call
pub const REASON_CUSTOMER_END: &str = "CUSTOMER_END";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued { session_id: String },
    Rejected(RejectReason),
}

impl EnqueueOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, EnqueueOutcome::Enqueued { .. })
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            EnqueueOutcome::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl Serialize for EnqueueOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EnqueueOutcome::Enqueued { session_id } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("sessionId", session_id)?;
                map.end()
            }
            EnqueueOutcome::Rejected(reason) => serialize_rejection(serializer, *reason),
        }
    }
}

/// Successful claim of a waiting session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedCall {
    pub session_id: String,
    pub consultant_id: String,
    pub channel: String,
    /// Epoch milliseconds
    pub accepted_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted(AcceptedCall),
    Rejected(RejectReason),
}

impl AcceptOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, AcceptOutcome::Accepted(_))
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            AcceptOutcome::Rejected(reason) => Some(*reason),
            AcceptOutcome::Accepted(_) => None,
        }
    }

    pub fn accepted(&self) -> Option<&AcceptedCall> {
        match self {
            AcceptOutcome::Accepted(call) => Some(call),
            AcceptOutcome::Rejected(_) => None,
        }
    }
}

impl Serialize for AcceptOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AcceptOutcome::Accepted(call) => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("sessionId", &call.session_id)?;
                map.serialize_entry("consultantId", &call.consultant_id)?;
                map.serialize_entry("channel", &call.channel)?;
                map.serialize_entry("acceptedAt", &call.accepted_at)?;
                map.end()
            }
            AcceptOutcome::Rejected(reason) => serialize_rejection(serializer, *reason),
        }
    }
}

fn serialize_rejection<S: Serializer>(serializer: S, reason: RejectReason) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry("ok", &false)?;
    map.serialize_entry("reason", &reason)?;
    map.end()
}

/// Parameters of an `end` call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndRequest {
    pub session_id: String,
    /// Agent claiming to own the call; `None` for customer and system triggers
    pub agent_id: Option<String>,
    pub ended_by: Option<String>,
    pub reason: Option<String>,
}

impl EndRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Agent hang-up: the agent is both the claimed owner and `endedBy`
    pub fn by_agent(session_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            session_id: session_id.into(),
            ended_by: Some(agent_id.clone()),
            agent_id: Some(agent_id),
            reason: Some(REASON_AGENT_END.to_string()),
        }
    }

    pub fn by_customer(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: None,
            ended_by: Some(ENDED_BY_CUSTOMER.to_string()),
            reason: Some(REASON_CUSTOMER_END.to_string()),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_ended_by(mut self, ended_by: impl Into<String>) -> Self {
        self.ended_by = Some(ended_by.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// What `end` actually did. The caller-facing result is `ok` in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndAction {
    /// The owner was released and the session finalized
    Ended { owner: String },
    /// No owner was recorded; only defensive cleanup ran
    NoOwner,
    /// The supplied agent is not the recorded owner; nothing changed
    Refused { recorded_owner: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOutcome {
    pub session_id: String,
    pub action: EndAction,
}

impl Serialize for EndOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("ok", &true)?;
        map.serialize_entry("sessionId", &self.session_id)?;
        map.end()
    }
}

/// Three-valued status reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceStatus {
    Waiting,
    Accepted,
    /// Also reported for ids that were never seen
    Ended,
}

impl VoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceStatus::Waiting => "WAITING",
            VoiceStatus::Accepted => "ACCEPTED",
            VoiceStatus::Ended => "ENDED",
        }
    }
}

impl fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry of the agent-facing waiting list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingSession {
    pub session_id: String,
    pub status: VoiceStatus,
}

impl WaitingSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: VoiceStatus::Waiting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub ok: bool,
    pub session_id: String,
    pub status: VoiceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultant_id: Option<String>,
}

impl StatusView {
    pub fn new(session_id: impl Into<String>, status: VoiceStatus, consultant_id: Option<String>) -> Self {
        Self {
            ok: true,
            session_id: session_id.into(),
            status,
            consultant_id,
        }
    }
}
