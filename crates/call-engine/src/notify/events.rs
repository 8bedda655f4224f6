//! Push event payloads delivered over agent and customer channels

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Kind of push event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushEventType {
    /// A new call entered the waiting queue
    VoiceEnqueued,
    /// A call was claimed by an agent
    VoiceAccepted,
    /// A call ended
    VoiceEnded,
    /// Sent only to the agent that claimed the call
    CallAssigned,
}

impl PushEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushEventType::VoiceEnqueued => "VOICE_ENQUEUED",
            PushEventType::VoiceAccepted => "VOICE_ACCEPTED",
            PushEventType::VoiceEnded => "VOICE_ENDED",
            PushEventType::CallAssigned => "CALL_ASSIGNED",
        }
    }
}

/// Wire form: `{type, sessionId, consultantId?, channel?, at}` with `at` in epoch ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub event_type: PushEventType,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub at: i64,
}

impl PushEvent {
    pub fn new(event_type: PushEventType, session_id: impl Into<String>) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            consultant_id: None,
            channel: None,
            at: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_consultant(mut self, consultant_id: impl Into<String>) -> Self {
        self.consultant_id = Some(consultant_id.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn at(mut self, at: i64) -> Self {
        self.at = at;
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
