use chrono::{DateTime, Utc};
use relay_proto::{
    Ack, AckError, AckOutcome, AckTimestamps, CommandReport, CommandStatus, ErrorCode, EventBody,
    LifecycleState, TerminalStatus,
};
use serde_json::json;
use tracing::{info, warn};

use crate::metrics;
use crate::registry::{lookup_mut, SessionRegistry, REASON_COMMAND_FAILED};

impl SessionRegistry {
    /// Moves an accepted command to its terminal status. A command's first
    /// terminal status sticks; later reports are refused.
    pub fn acknowledge_command(
        &mut self,
        user_id: &str,
        workspace_id: &str,
        session_id: &str,
        report: CommandReport,
    ) -> Ack {
        let now = Utc::now();
        let Some(record) = lookup_mut(&mut self.sessions, session_id, user_id, workspace_id) else {
            return refuse(
                session_id,
                &report,
                LifecycleState::Error,
                None,
                now,
                AckError::protocol(
                    ErrorCode::SessionNotFound,
                    format!("session {session_id} not found"),
                ),
            );
        };

        let lifecycle = record.session.lifecycle_state;
        let Some(command) = record.commands.get_mut(&report.command_id) else {
            let error = AckError::protocol(
                ErrorCode::CommandNotFound,
                format!("command {} not found", report.command_id),
            );
            let ack = refuse(session_id, &report, lifecycle, None, now, error);
            record.append_event(self.sink.as_deref(), EventBody::CommandAck(ack.clone()), now);
            return ack;
        };

        let scope = Some(command.permission_scope.clone());
        let outcome = if command.sequence != report.sequence {
            Err(AckError::protocol(
                ErrorCode::SequenceConflict,
                format!(
                    "command {} was registered at sequence {}, ack says {}",
                    command.command_id, command.sequence, report.sequence
                ),
            )
            .with_details(json!({ "expected": command.sequence, "received": report.sequence })))
        } else if command.status.is_terminal() {
            Err(AckError::protocol(
                ErrorCode::InvalidTransition,
                format!("command {} already finished", command.command_id),
            )
            .with_details(json!({ "status": command.status })))
        } else {
            terminal_outcome(&report)
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                let ack = refuse(session_id, &report, lifecycle, scope, now, error);
                record.append_event(self.sink.as_deref(), EventBody::CommandAck(ack.clone()), now);
                return ack;
            }
        };

        command.status = CommandStatus::from(report.status);
        command.updated_at = now;
        // Closing and closed are final for the session; a late failure only
        // settles the command.
        let escalate = report.status == TerminalStatus::Failed && lifecycle.accepts_commands();
        if escalate {
            record.set_lifecycle(LifecycleState::Error, now);
        } else {
            record.session.updated_at = now;
        }

        let ack = finalized(
            session_id,
            &report,
            record.session.lifecycle_state,
            scope,
            outcome,
            now,
        );
        metrics::COMMAND_ACKS
            .with_label_values(&[status_label(report.status)])
            .inc();
        info!(
            session_id = %session_id,
            command_id = %report.command_id,
            sequence = report.sequence,
            status = status_label(report.status),
            "command finalized"
        );

        record.append_event(self.sink.as_deref(), EventBody::CommandAck(ack.clone()), now);
        if escalate {
            let body = record.lifecycle_event(REASON_COMMAND_FAILED);
            record.append_event(self.sink.as_deref(), body, now);
        }
        ack
    }
}

/// Failed and rejected reports must say why.
fn terminal_outcome(report: &CommandReport) -> Result<AckOutcome, AckError> {
    match (report.status, &report.error) {
        (TerminalStatus::Completed, _) => Ok(AckOutcome::Completed),
        (TerminalStatus::Failed, Some(error)) => Ok(AckOutcome::Failed {
            error: error.clone(),
        }),
        (TerminalStatus::Rejected, Some(error)) => Ok(AckOutcome::Rejected {
            error: error.clone(),
        }),
        (status, None) => Err(AckError::protocol(
            ErrorCode::InvalidAck,
            format!("{} acknowledgments must carry an error", status_label(status)),
        )),
    }
}

fn finalized(
    session_id: &str,
    report: &CommandReport,
    lifecycle_state: LifecycleState,
    permission_scope: Option<String>,
    outcome: AckOutcome,
    at: DateTime<Utc>,
) -> Ack {
    Ack {
        session_id: session_id.to_string(),
        command_id: Some(report.command_id.clone()),
        sequence: Some(report.sequence),
        lifecycle_state,
        permission_scope,
        timestamps: AckTimestamps {
            received_at: at,
            finalized_at: Some(at),
        },
        outcome,
    }
}

fn refuse(
    session_id: &str,
    report: &CommandReport,
    lifecycle_state: LifecycleState,
    permission_scope: Option<String>,
    at: DateTime<Utc>,
    error: AckError,
) -> Ack {
    metrics::record_rejection(&error.code);
    warn!(
        session_id = %session_id,
        command_id = %report.command_id,
        sequence = report.sequence,
        code = ?error.code,
        message = %error.message,
        "acknowledgment refused"
    );
    Ack {
        session_id: session_id.to_string(),
        command_id: Some(report.command_id.clone()),
        sequence: Some(report.sequence),
        lifecycle_state,
        permission_scope,
        timestamps: AckTimestamps {
            received_at: at,
            finalized_at: None,
        },
        outcome: AckOutcome::Rejected { error },
    }
}

fn status_label(status: TerminalStatus) -> &'static str {
    match status {
        TerminalStatus::Completed => "completed",
        TerminalStatus::Failed => "failed",
        TerminalStatus::Rejected => "rejected",
    }
}
