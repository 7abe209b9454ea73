use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ack::Ack;
use crate::session::LifecycleState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionState,
    CommandAck,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionState => "session_state",
            EventKind::CommandAck => "command_ack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventBody {
    SessionState {
        lifecycle_state: LifecycleState,
        reason: String,
    },
    CommandAck(Ack),
}

/// Entry in a session's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub index: u64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self.body {
            EventBody::SessionState { .. } => EventKind::SessionState,
            EventBody::CommandAck(_) => EventKind::CommandAck,
        }
    }

    pub fn as_named_json(&self) -> (&'static str, Option<String>) {
        (self.kind().as_str(), serde_json::to_string(self).ok())
    }
}
