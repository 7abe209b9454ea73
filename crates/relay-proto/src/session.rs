use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PERMISSION_NAMESPACES, PROTOCOL_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Connecting,
    Active,
    Paused,
    Closing,
    Closed,
    Error,
}

impl LifecycleState {
    /// Closing and closed sessions no longer take new commands.
    pub fn accepts_commands(self) -> bool {
        !matches!(self, LifecycleState::Closing | LifecycleState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Ws,
    Sse,
    Rest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectedTransport {
    Ws,
    SseRestFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDescriptor {
    pub primary: TransportKind,
    pub fallback: Vec<TransportKind>,
    pub selected: SelectedTransport,
}

impl TransportDescriptor {
    pub fn negotiate(ws_available: bool) -> Self {
        Self {
            primary: TransportKind::Ws,
            fallback: vec![TransportKind::Sse, TransportKind::Rest],
            selected: if ws_available {
                SelectedTransport::Ws
            } else {
                SelectedTransport::SseRestFallback
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub single_tab: bool,
    pub multi_tab: bool,
    pub voice: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            single_tab: true,
            multi_tab: false,
            voice: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionMapping {
    pub namespaces: Vec<String>,
}

impl Default for PermissionMapping {
    fn default() -> Self {
        Self {
            namespaces: PERMISSION_NAMESPACES.iter().map(|ns| ns.to_string()).collect(),
        }
    }
}

/// Browser tab a session or command is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTab {
    pub tab_id: i64,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Snapshot of an extension session as handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub protocol_version: String,
    pub user_id: String,
    pub workspace_id: String,
    pub extension_runtime_id: String,
    pub lifecycle_state: LifecycleState,
    pub transport: TransportDescriptor,
    pub capabilities: Capabilities,
    pub permission_mapping: PermissionMapping,
    pub active_tab_id: Option<i64>,
    pub last_sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        session_id: String,
        user_id: String,
        workspace_id: String,
        extension_runtime_id: String,
        ws_available: bool,
        active_tab_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            protocol_version: PROTOCOL_VERSION.to_string(),
            user_id,
            workspace_id,
            extension_runtime_id,
            lifecycle_state: LifecycleState::Active,
            transport: TransportDescriptor::negotiate(ws_available),
            capabilities: Capabilities::default(),
            permission_mapping: PermissionMapping::default(),
            active_tab_id,
            last_sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &str, workspace_id: &str) -> bool {
        self.user_id == user_id && self.workspace_id == workspace_id
    }
}

/// Command message issued toward the extension runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default)]
    pub session_id: String,
    pub command_id: String,
    pub sequence: u64,
    pub command_kind: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub target_tab: TargetTab,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Accepted,
    Rejected,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandStatus::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transport_selection_follows_ws_availability() {
        let ws = TransportDescriptor::negotiate(true);
        assert_eq!(ws.selected, SelectedTransport::Ws);
        let fallback = TransportDescriptor::negotiate(false);
        assert_eq!(fallback.selected, SelectedTransport::SseRestFallback);
        assert_eq!(fallback.fallback, vec![TransportKind::Sse, TransportKind::Rest]);
        assert_eq!(
            serde_json::to_value(&fallback).unwrap(),
            json!({"primary": "ws", "fallback": ["sse", "rest"], "selected": "sse_rest_fallback"})
        );
    }

    #[test]
    fn envelope_defaults_missing_arguments_and_session() {
        let envelope: CommandEnvelope = serde_json::from_value(json!({
            "command_id": "cmd-1",
            "sequence": 1,
            "command_kind": "tool_execute",
            "tool_name": "tab_info",
            "target_tab": { "tab_id": 7 }
        }))
        .unwrap();
        assert!(envelope.session_id.is_empty());
        assert!(envelope.arguments.is_null());
        assert!(envelope.target_tab.url.is_empty());
    }

    #[test]
    fn closing_states_refuse_commands() {
        assert!(LifecycleState::Active.accepts_commands());
        assert!(LifecycleState::Error.accepts_commands());
        assert!(!LifecycleState::Closing.accepts_commands());
        assert!(!LifecycleState::Closed.accepts_commands());
    }
}
