use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use relay_proto::{
    Ack, CommandEnvelope, CommandReport, LifecycleState, Session, SessionEvent, TargetTab,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::AppConfig;
use crate::registry::{EventSink, SessionRegistry};

/// Caller identity as established by the gateway in front of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub workspace_id: String,
}

/// Per-session broadcast channels feeding live event streams.
pub struct SessionStreams {
    channels: RwLock<HashMap<String, broadcast::Sender<SessionEvent>>>,
    buffer: usize,
}

impl SessionStreams {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<SessionEvent> {
        let mut map = self.channels.write();
        map.entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe()
    }

    /// Drops the channel so open streams end once they drain.
    pub fn finish(&self, session_id: &str) {
        self.channels.write().remove(session_id);
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.channels
            .read()
            .get(session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl EventSink for SessionStreams {
    fn publish(&self, session_id: &str, event: &SessionEvent) {
        let tx = { self.channels.read().get(session_id).cloned() };
        if let Some(tx) = tx {
            let _ = tx.send(event.clone());
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    start: Instant,
    registry: Arc<Mutex<SessionRegistry>>,
    streams: Arc<SessionStreams>,
    ws_available: bool,
    sse_keepalive: Duration,
}

impl AppState {
    pub fn new(cfg: &AppConfig) -> Self {
        let streams = Arc::new(SessionStreams::new(cfg.stream_buffer));
        let registry = SessionRegistry::new().with_sink(streams.clone());
        Self {
            start: Instant::now(),
            registry: Arc::new(Mutex::new(registry)),
            streams,
            ws_available: cfg.websocket_enabled,
            sse_keepalive: cfg.sse_keepalive(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn sse_keepalive(&self) -> Duration {
        self.sse_keepalive
    }

    pub fn open_sessions(&self) -> usize {
        self.registry.lock().open_sessions()
    }

    pub fn create_session(
        &self,
        actor: &Actor,
        extension_runtime_id: &str,
        target_tab: Option<&TargetTab>,
    ) -> Session {
        self.registry.lock().create(
            &actor.user_id,
            &actor.workspace_id,
            extension_runtime_id,
            self.ws_available,
            target_tab,
        )
    }

    pub fn session(&self, actor: &Actor, session_id: &str) -> Option<Session> {
        self.registry
            .lock()
            .get(session_id, &actor.user_id, &actor.workspace_id)
    }

    pub fn close_session(
        &self,
        actor: &Actor,
        session_id: &str,
        reason: Option<&str>,
    ) -> Option<Session> {
        let closed = self.registry.lock().close(
            session_id,
            &actor.user_id,
            &actor.workspace_id,
            reason,
        )?;
        self.streams.finish(session_id);
        Some(closed)
    }

    pub fn register_command(&self, actor: &Actor, envelope: &CommandEnvelope) -> Ack {
        self.registry
            .lock()
            .register_command(&actor.user_id, &actor.workspace_id, envelope)
    }

    pub fn acknowledge_command(
        &self,
        actor: &Actor,
        session_id: &str,
        report: CommandReport,
    ) -> Ack {
        self.registry.lock().acknowledge_command(
            &actor.user_id,
            &actor.workspace_id,
            session_id,
            report,
        )
    }

    pub fn list_events(
        &self,
        actor: &Actor,
        session_id: &str,
        limit: Option<usize>,
    ) -> Option<Vec<SessionEvent>> {
        self.registry
            .lock()
            .list_events(session_id, &actor.user_id, &actor.workspace_id, limit)
    }

    /// Live feed of a session's events. Ownership is checked under the
    /// registry lock so nothing can be appended between check and subscribe.
    /// A closed session yields a feed that is already finished.
    pub fn subscribe(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> Option<broadcast::Receiver<SessionEvent>> {
        let registry = self.registry.lock();
        let session = registry.get(session_id, &actor.user_id, &actor.workspace_id)?;
        if session.lifecycle_state == LifecycleState::Closed {
            let (_, rx) = broadcast::channel(1);
            return Some(rx);
        }
        Some(self.streams.subscribe(session_id))
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.streams.subscriber_count(session_id)
    }

    /// Tears the registry down at process exit. Nothing survives a restart.
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock();
        info!(
            sessions = registry.len(),
            open = registry.open_sessions(),
            "dropping extension sessions on shutdown"
        );
        *registry = SessionRegistry::new().with_sink(self.streams.clone());
    }
}
