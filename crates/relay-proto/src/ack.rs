use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{CommandStatus, LifecycleState};

/// Closed set of reasons the manager refuses a command or acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionNotFound,
    /// Declared for clients; authorization beyond user/workspace identity
    /// is enforced by the adapter layer, so the core never emits it.
    SessionScopeDenied,
    SequenceConflict,
    SingleTabViolation,
    UnsupportedCommand,
    PermissionScopeInvalid,
    NonInjectableTarget,
    CommandNotFound,
    InvalidTransition,
    InvalidAck,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SessionNotFound => "session_not_found",
            ErrorCode::SessionScopeDenied => "session_scope_denied",
            ErrorCode::SequenceConflict => "sequence_conflict",
            ErrorCode::SingleTabViolation => "single_tab_violation",
            ErrorCode::UnsupportedCommand => "unsupported_command",
            ErrorCode::PermissionScopeInvalid => "permission_scope_invalid",
            ErrorCode::NonInjectableTarget => "non_injectable_target",
            ErrorCode::CommandNotFound => "command_not_found",
            ErrorCode::InvalidTransition => "invalid_transition",
            ErrorCode::InvalidAck => "invalid_ack",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes are either ours or whatever the extension reported when a
/// tool run failed on its side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AckErrorCode {
    Protocol(ErrorCode),
    Runtime(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckError {
    pub code: AckErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AckError {
    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: AckErrorCode::Protocol(code),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckTimestamps {
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckOutcome {
    Accepted,
    Completed,
    Failed { error: AckError },
    Rejected { error: AckError },
}

/// Acknowledgment for a registered envelope or a terminal status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    pub lifecycle_state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_scope: Option<String>,
    pub timestamps: AckTimestamps,
    #[serde(flatten)]
    pub outcome: AckOutcome,
}

impl Ack {
    pub fn status(&self) -> CommandStatus {
        match self.outcome {
            AckOutcome::Accepted => CommandStatus::Accepted,
            AckOutcome::Completed => CommandStatus::Completed,
            AckOutcome::Failed { .. } => CommandStatus::Failed,
            AckOutcome::Rejected { .. } => CommandStatus::Rejected,
        }
    }

    pub fn error(&self) -> Option<&AckError> {
        match &self.outcome {
            AckOutcome::Failed { error } | AckOutcome::Rejected { error } => Some(error),
            AckOutcome::Accepted | AckOutcome::Completed => None,
        }
    }

    /// Protocol error code when the manager itself refused the request.
    pub fn rejection_code(&self) -> Option<ErrorCode> {
        match &self.outcome {
            AckOutcome::Rejected {
                error:
                    AckError {
                        code: AckErrorCode::Protocol(code),
                        ..
                    },
            } => Some(*code),
            _ => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, AckOutcome::Accepted)
    }
}

/// Statuses an extension may report when finishing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Failed,
    Rejected,
}

impl From<TerminalStatus> for CommandStatus {
    fn from(value: TerminalStatus) -> Self {
        match value {
            TerminalStatus::Completed => CommandStatus::Completed,
            TerminalStatus::Failed => CommandStatus::Failed,
            TerminalStatus::Rejected => CommandStatus::Rejected,
        }
    }
}

/// Terminal status report posted by the extension once a command finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReport {
    #[serde(default)]
    pub command_id: String,
    pub sequence: u64,
    pub status: TerminalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
}
