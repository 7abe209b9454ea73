//! Session registry for browser-extension command sessions.
//!
//! A session binds one extension runtime to at most one browser tab for a
//! (user, workspace) pair. Every lookup is scoped by that pair; a mismatch
//! looks exactly like a missing session.
//!
//! The registry holds no locks. Each operation takes `&mut self` and runs
//! its checks and mutation in one go, so whoever owns the registry decides
//! how calls are serialized.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_proto::{
    CommandStatus, EventBody, LifecycleState, Session, SessionEvent, TargetTab,
};
use tracing::info;
use uuid::Uuid;

use crate::event_log::EventLog;
use crate::metrics;

pub const REASON_SESSION_STARTED: &str = "session_started";
pub const REASON_SESSION_CLOSED: &str = "session_closed";
pub const REASON_COMMAND_FAILED: &str = "command_failed";

/// Receives every event right after it lands in a session log.
pub trait EventSink: Send + Sync {
    fn publish(&self, session_id: &str, event: &SessionEvent);
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub command_id: String,
    pub sequence: u64,
    pub tool_name: String,
    pub tab_id: i64,
    pub status: CommandStatus,
    pub permission_scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct SessionRecord {
    pub(crate) session: Session,
    pub(crate) commands: HashMap<String, CommandRecord>,
    pub(crate) events: EventLog,
}

impl SessionRecord {
    pub(crate) fn append_event(
        &mut self,
        sink: Option<&dyn EventSink>,
        body: EventBody,
        at: DateTime<Utc>,
    ) {
        let event = self.events.append(body, at);
        if let Some(sink) = sink {
            sink.publish(&self.session.session_id, &event);
        }
    }

    pub(crate) fn set_lifecycle(&mut self, state: LifecycleState, at: DateTime<Utc>) {
        self.session.lifecycle_state = state;
        self.session.updated_at = at;
    }

    pub(crate) fn lifecycle_event(&self, reason: &str) -> EventBody {
        EventBody::SessionState {
            lifecycle_state: self.session.lifecycle_state,
            reason: reason.to_string(),
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    pub(crate) sessions: HashMap<String, SessionRecord>,
    pub(crate) sink: Option<Arc<dyn EventSink>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn create(
        &mut self,
        user_id: &str,
        workspace_id: &str,
        extension_runtime_id: &str,
        ws_available: bool,
        target_tab: Option<&TargetTab>,
    ) -> Session {
        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();
        let mut record = SessionRecord {
            session: Session::new(
                session_id.clone(),
                user_id.to_string(),
                workspace_id.to_string(),
                extension_runtime_id.to_string(),
                ws_available,
                target_tab.map(|tab| tab.tab_id),
                now,
            ),
            commands: HashMap::new(),
            events: EventLog::default(),
        };
        let body = record.lifecycle_event(REASON_SESSION_STARTED);
        record.append_event(self.sink.as_deref(), body, now);

        info!(
            session_id = %session_id,
            workspace_id = %workspace_id,
            extension_runtime_id = %extension_runtime_id,
            transport = ?record.session.transport.selected,
            active_tab_id = ?record.session.active_tab_id,
            "extension session started"
        );
        metrics::SESSIONS_CREATED.inc();
        metrics::SESSIONS_OPEN.inc();

        let snapshot = record.session.clone();
        self.sessions.insert(session_id, record);
        snapshot
    }

    pub fn get(&self, session_id: &str, user_id: &str, workspace_id: &str) -> Option<Session> {
        lookup(&self.sessions, session_id, user_id, workspace_id).map(|r| r.session.clone())
    }

    pub fn close(
        &mut self,
        session_id: &str,
        user_id: &str,
        workspace_id: &str,
        reason: Option<&str>,
    ) -> Option<Session> {
        let record = lookup_mut(&mut self.sessions, session_id, user_id, workspace_id)?;
        let now = Utc::now();
        if record.session.lifecycle_state != LifecycleState::Closed {
            record.set_lifecycle(LifecycleState::Closed, now);
            metrics::SESSIONS_CLOSED.inc();
            metrics::SESSIONS_OPEN.dec();
        }
        let reason = reason.unwrap_or(REASON_SESSION_CLOSED);
        let body = record.lifecycle_event(reason);
        record.append_event(self.sink.as_deref(), body, now);
        info!(session_id = %session_id, reason = %reason, "extension session closed");
        Some(record.session.clone())
    }

    pub fn list_events(
        &self,
        session_id: &str,
        user_id: &str,
        workspace_id: &str,
        limit: Option<usize>,
    ) -> Option<Vec<SessionEvent>> {
        lookup(&self.sessions, session_id, user_id, workspace_id).map(|r| r.events.recent(limit))
    }

    pub fn command(
        &self,
        session_id: &str,
        user_id: &str,
        workspace_id: &str,
        command_id: &str,
    ) -> Option<CommandRecord> {
        lookup(&self.sessions, session_id, user_id, workspace_id)
            .and_then(|r| r.commands.get(command_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions not yet closed, across all tenants.
    pub fn open_sessions(&self) -> usize {
        self.sessions
            .values()
            .filter(|r| r.session.lifecycle_state != LifecycleState::Closed)
            .count()
    }

    /// Drops every session and takes them off the open-sessions gauge.
    /// Only for isolating test runs; the other counters are process-wide.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn reset(&mut self) {
        metrics::SESSIONS_OPEN.sub(self.open_sessions() as i64);
        self.sessions.clear();
    }
}

pub(crate) fn lookup<'a>(
    sessions: &'a HashMap<String, SessionRecord>,
    session_id: &str,
    user_id: &str,
    workspace_id: &str,
) -> Option<&'a SessionRecord> {
    sessions
        .get(session_id)
        .filter(|r| r.session.is_owned_by(user_id, workspace_id))
}

pub(crate) fn lookup_mut<'a>(
    sessions: &'a mut HashMap<String, SessionRecord>,
    session_id: &str,
    user_id: &str,
    workspace_id: &str,
) -> Option<&'a mut SessionRecord> {
    sessions
        .get_mut(session_id)
        .filter(|r| r.session.is_owned_by(user_id, workspace_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use relay_proto::{SelectedTransport, PROTOCOL_VERSION};

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(String, u64)>>);

    impl EventSink for RecordingSink {
        fn publish(&self, session_id: &str, event: &SessionEvent) {
            self.0.lock().push((session_id.to_string(), event.index));
        }
    }

    fn tab(tab_id: i64) -> TargetTab {
        TargetTab {
            tab_id,
            url: "https://example.com".into(),
            title: None,
        }
    }

    #[test]
    fn create_binds_tab_and_selects_transport() {
        let mut registry = SessionRegistry::new();
        let session = registry.create("u1", "w1", "ext-1", false, Some(&tab(42)));
        assert_eq!(session.protocol_version, PROTOCOL_VERSION);
        assert_eq!(session.lifecycle_state, LifecycleState::Active);
        assert_eq!(session.active_tab_id, Some(42));
        assert_eq!(session.last_sequence, 0);
        assert_eq!(session.transport.selected, SelectedTransport::SseRestFallback);
        assert!(session.capabilities.single_tab);
        assert!(!session.capabilities.multi_tab);

        let ws = registry.create("u1", "w1", "ext-1", true, None);
        assert_eq!(ws.transport.selected, SelectedTransport::Ws);
        assert_eq!(ws.active_tab_id, None);
        assert_ne!(ws.session_id, session.session_id);
    }

    #[test]
    fn create_records_session_started_event() {
        let mut registry = SessionRegistry::new();
        let session = registry.create("u1", "w1", "ext-1", false, None);
        let events = registry
            .list_events(&session.session_id, "u1", "w1", None)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 1);
        assert_eq!(
            events[0].body,
            EventBody::SessionState {
                lifecycle_state: LifecycleState::Active,
                reason: REASON_SESSION_STARTED.into(),
            }
        );
    }

    #[test]
    fn lookups_are_scoped_to_user_and_workspace() {
        let mut registry = SessionRegistry::new();
        let session = registry.create("u1", "w1", "ext-1", false, None);
        let id = session.session_id.as_str();

        assert!(registry.get(id, "u1", "w1").is_some());
        assert!(registry.get(id, "u2", "w1").is_none());
        assert!(registry.get(id, "u1", "w2").is_none());
        assert!(registry.get("missing", "u1", "w1").is_none());
        assert!(registry.list_events(id, "u2", "w1", None).is_none());
        assert!(registry.close(id, "u1", "w2", None).is_none());
        assert_eq!(
            registry.get(id, "u1", "w1").unwrap().lifecycle_state,
            LifecycleState::Active
        );
    }

    #[test]
    fn close_marks_closed_and_appends_each_time() {
        let mut registry = SessionRegistry::new();
        let session = registry.create("u1", "w1", "ext-1", false, None);
        let id = session.session_id.as_str();

        let closed = registry.close(id, "u1", "w1", Some("user_left")).unwrap();
        assert_eq!(closed.lifecycle_state, LifecycleState::Closed);
        let again = registry.close(id, "u1", "w1", None).unwrap();
        assert_eq!(again.lifecycle_state, LifecycleState::Closed);

        let events = registry.list_events(id, "u1", "w1", None).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1].body,
            EventBody::SessionState { lifecycle_state: LifecycleState::Closed, reason }
                if reason == "user_left"
        ));
        assert!(matches!(
            &events[2].body,
            EventBody::SessionState { reason, .. } if reason == REASON_SESSION_CLOSED
        ));
        assert_eq!(registry.open_sessions(), 0);
    }

    #[test]
    fn sink_sees_every_appended_event() {
        let sink = Arc::new(RecordingSink::default());
        let mut registry = SessionRegistry::new().with_sink(sink.clone());
        let session = registry.create("u1", "w1", "ext-1", false, None);
        registry.close(&session.session_id, "u1", "w1", None);

        let seen = sink.0.lock().clone();
        assert_eq!(
            seen,
            vec![(session.session_id.clone(), 1), (session.session_id.clone(), 2)]
        );
    }

    #[test]
    fn reset_clears_all_sessions() {
        let mut registry = SessionRegistry::new();
        registry.create("u1", "w1", "ext-1", false, None);
        let closed = registry.create("u2", "w2", "ext-2", true, None);
        registry.close(&closed.session_id, "u2", "w2", None);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.open_sessions(), 1);
        registry.reset();
        assert!(registry.is_empty());
        assert_eq!(registry.open_sessions(), 0);
    }
}
