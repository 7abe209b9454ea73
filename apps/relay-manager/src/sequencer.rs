//! Admission of command envelopes into a session.
//!
//! Gates run in a fixed order and the first failure decides the rejection.
//! Accepted or not, the outcome is written to the session's event log
//! before the ack is returned.

use chrono::{DateTime, Utc};
use relay_proto::{
    Ack, AckError, AckOutcome, AckTimestamps, CommandEnvelope, CommandStatus, ErrorCode, EventBody,
    LifecycleState, COMMAND_KIND_TOOL_EXECUTE,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::metrics;
use crate::registry::{lookup_mut, CommandRecord, SessionRecord, SessionRegistry};
use crate::scope::{derive_permission_scope, is_grantable};

/// URL schemes the extension cannot script.
pub const NON_INJECTABLE_PREFIXES: [&str; 6] = [
    "chrome://",
    "chrome-extension://",
    "edge://",
    "about:",
    "devtools://",
    "view-source:",
];

pub fn is_injectable_url(url: &str) -> bool {
    !NON_INJECTABLE_PREFIXES
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

impl SessionRegistry {
    pub fn register_command(
        &mut self,
        user_id: &str,
        workspace_id: &str,
        envelope: &CommandEnvelope,
    ) -> Ack {
        let received_at = Utc::now();
        let Some(record) =
            lookup_mut(&mut self.sessions, &envelope.session_id, user_id, workspace_id)
        else {
            let error = AckError::protocol(
                ErrorCode::SessionNotFound,
                format!("session {} not found", envelope.session_id),
            );
            log_rejection(envelope, &error);
            return rejected(envelope, LifecycleState::Error, received_at, error);
        };

        let ack = match admit(record, envelope) {
            Ok(scope) => accept(record, envelope, scope, received_at),
            Err(error) => {
                log_rejection(envelope, &error);
                rejected(envelope, record.session.lifecycle_state, received_at, error)
            }
        };
        record.append_event(
            self.sink.as_deref(),
            EventBody::CommandAck(ack.clone()),
            received_at,
        );
        ack
    }
}

/// Runs every gate against the session without touching it. Returns the
/// permission scope the command will run under.
fn admit(record: &SessionRecord, envelope: &CommandEnvelope) -> Result<String, AckError> {
    let session = &record.session;

    if !session.lifecycle_state.accepts_commands() {
        return Err(AckError::protocol(
            ErrorCode::InvalidTransition,
            format!(
                "session is {:?} and no longer accepts commands",
                session.lifecycle_state
            ),
        ));
    }

    let expected = session.last_sequence + 1;
    if envelope.sequence != expected {
        return Err(AckError::protocol(
            ErrorCode::SequenceConflict,
            format!("expected sequence {expected}, received {}", envelope.sequence),
        )
        .with_details(json!({ "expected": expected, "received": envelope.sequence })));
    }

    if let Some(active) = session.active_tab_id {
        if active != envelope.target_tab.tab_id {
            return Err(AckError::protocol(
                ErrorCode::SingleTabViolation,
                format!(
                    "session is bound to tab {active}, command targets tab {}",
                    envelope.target_tab.tab_id
                ),
            )
            .with_details(json!({
                "active_tab_id": active,
                "target_tab_id": envelope.target_tab.tab_id,
            })));
        }
    }

    if !is_injectable_url(&envelope.target_tab.url) {
        return Err(AckError::protocol(
            ErrorCode::NonInjectableTarget,
            format!("cannot run tools on {}", envelope.target_tab.url),
        ));
    }

    if envelope.command_kind != COMMAND_KIND_TOOL_EXECUTE {
        return Err(AckError::protocol(
            ErrorCode::UnsupportedCommand,
            format!("unsupported command kind {}", envelope.command_kind),
        ));
    }

    let scope = derive_permission_scope(&envelope.tool_name, &envelope.arguments)
        .filter(|scope| is_grantable(scope))
        .ok_or_else(|| {
            AckError::protocol(
                ErrorCode::PermissionScopeInvalid,
                format!("no permission scope for tool {}", envelope.tool_name),
            )
        })?;

    if record.commands.contains_key(&envelope.command_id) {
        return Err(AckError::protocol(
            ErrorCode::InvalidTransition,
            format!("command {} already registered", envelope.command_id),
        ));
    }

    Ok(scope)
}

fn accept(
    record: &mut SessionRecord,
    envelope: &CommandEnvelope,
    scope: String,
    received_at: DateTime<Utc>,
) -> Ack {
    let session = &mut record.session;
    session.active_tab_id = Some(envelope.target_tab.tab_id);
    session.last_sequence = envelope.sequence;
    session.updated_at = received_at;

    record.commands.insert(
        envelope.command_id.clone(),
        CommandRecord {
            command_id: envelope.command_id.clone(),
            sequence: envelope.sequence,
            tool_name: envelope.tool_name.clone(),
            tab_id: envelope.target_tab.tab_id,
            status: CommandStatus::Accepted,
            permission_scope: scope.clone(),
            created_at: received_at,
            updated_at: received_at,
        },
    );

    debug!(
        session_id = %envelope.session_id,
        command_id = %envelope.command_id,
        sequence = envelope.sequence,
        tool = %envelope.tool_name,
        scope = %scope,
        "command accepted"
    );
    metrics::COMMANDS_REGISTERED
        .with_label_values(&["accepted"])
        .inc();

    Ack {
        session_id: envelope.session_id.clone(),
        command_id: Some(envelope.command_id.clone()),
        sequence: Some(envelope.sequence),
        lifecycle_state: record.session.lifecycle_state,
        permission_scope: Some(scope),
        timestamps: AckTimestamps {
            received_at,
            finalized_at: None,
        },
        outcome: AckOutcome::Accepted,
    }
}

fn rejected(
    envelope: &CommandEnvelope,
    lifecycle_state: LifecycleState,
    received_at: DateTime<Utc>,
    error: AckError,
) -> Ack {
    metrics::COMMANDS_REGISTERED
        .with_label_values(&["rejected"])
        .inc();
    Ack {
        session_id: envelope.session_id.clone(),
        command_id: Some(envelope.command_id.clone()),
        sequence: Some(envelope.sequence),
        lifecycle_state,
        permission_scope: None,
        timestamps: AckTimestamps {
            received_at,
            finalized_at: None,
        },
        outcome: AckOutcome::Rejected { error },
    }
}

fn log_rejection(envelope: &CommandEnvelope, error: &AckError) {
    metrics::record_rejection(&error.code);
    warn!(
        session_id = %envelope.session_id,
        command_id = %envelope.command_id,
        sequence = envelope.sequence,
        code = ?error.code,
        message = %error.message,
        "command rejected"
    );
}
