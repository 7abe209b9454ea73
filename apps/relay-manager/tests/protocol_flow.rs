use relay_manager::registry::SessionRegistry;
use relay_proto::{
    Ack, AckError, CommandEnvelope, CommandReport, CommandStatus, ErrorCode, EventBody,
    LifecycleState, SelectedTransport, TargetTab, TerminalStatus, COMMAND_KIND_TOOL_EXECUTE,
};
use serde_json::{json, Value};

const USER: &str = "user-1";
const WORKSPACE: &str = "ws-1";

fn tab(tab_id: i64, url: &str) -> TargetTab {
    TargetTab {
        tab_id,
        url: url.into(),
        title: None,
    }
}

fn envelope(
    session_id: &str,
    sequence: u64,
    tool: &str,
    arguments: Value,
    tab_id: i64,
) -> CommandEnvelope {
    CommandEnvelope {
        session_id: session_id.into(),
        command_id: format!("cmd-{sequence}"),
        sequence,
        command_kind: COMMAND_KIND_TOOL_EXECUTE.into(),
        tool_name: tool.into(),
        arguments,
        target_tab: tab(tab_id, "https://example.com/page"),
    }
}

fn read_info(registry: &mut SessionRegistry, session_id: &str, sequence: u64, tab_id: i64) -> Ack {
    let envelope = envelope(session_id, sequence, "tab_read", json!({ "mode": "info" }), tab_id);
    registry.register_command(USER, WORKSPACE, &envelope)
}

fn finish(
    registry: &mut SessionRegistry,
    session_id: &str,
    status: TerminalStatus,
    error: Option<AckError>,
) -> Ack {
    let report = CommandReport {
        command_id: "cmd-1".into(),
        sequence: 1,
        status,
        error,
    };
    registry.acknowledge_command(USER, WORKSPACE, session_id, report)
}

#[test]
fn single_tab_session_end_to_end() {
    let mut registry = SessionRegistry::new();
    let target = tab(42, "https://example.com");
    let session = registry.create(USER, WORKSPACE, "ext-runtime-1", false, Some(&target));
    assert_eq!(session.active_tab_id, Some(42));
    assert_eq!(session.transport.selected, SelectedTransport::SseRestFallback);
    let id = session.session_id.clone();

    let ack = read_info(&mut registry, &id, 1, 42);
    assert!(ack.is_accepted());
    assert_eq!(ack.permission_scope.as_deref(), Some("tab_read:info"));

    let ack = read_info(&mut registry, &id, 1, 42);
    assert_eq!(ack.rejection_code(), Some(ErrorCode::SequenceConflict));

    let ack = read_info(&mut registry, &id, 2, 43);
    assert_eq!(ack.rejection_code(), Some(ErrorCode::SingleTabViolation));

    let current = registry.get(&id, USER, WORKSPACE).unwrap();
    assert_eq!(current.last_sequence, 1);

    let ack = finish(&mut registry, &id, TerminalStatus::Completed, None);
    assert_eq!(ack.status(), CommandStatus::Completed);

    let events = registry.list_events(&id, USER, WORKSPACE, None).unwrap();
    let indices: Vec<u64> = events.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    assert!(matches!(
        &events[2].body,
        EventBody::CommandAck(ack) if ack.rejection_code() == Some(ErrorCode::SequenceConflict)
    ));
}

#[test]
fn failed_ack_moves_session_to_error_and_first_status_sticks() {
    let mut registry = SessionRegistry::new();
    let id = registry.create(USER, WORKSPACE, "ext", true, None).session_id;

    let click = envelope(&id, 1, "tab_action", json!({ "actions": [{ "action": "click" }] }), 7);
    let ack = registry.register_command(USER, WORKSPACE, &click);
    assert_eq!(ack.permission_scope.as_deref(), Some("tab_action:click"));

    let missing_error = finish(&mut registry, &id, TerminalStatus::Failed, None);
    assert_eq!(missing_error.rejection_code(), Some(ErrorCode::InvalidAck));
    assert_eq!(
        registry.command(&id, USER, WORKSPACE, "cmd-1").unwrap().status,
        CommandStatus::Accepted
    );

    let error = AckError::protocol(ErrorCode::InvalidAck, "element not found");
    let failed = finish(&mut registry, &id, TerminalStatus::Failed, Some(error));
    assert_eq!(failed.status(), CommandStatus::Failed);
    assert_eq!(failed.lifecycle_state, LifecycleState::Error);

    let again = finish(&mut registry, &id, TerminalStatus::Completed, None);
    assert_eq!(again.rejection_code(), Some(ErrorCode::InvalidTransition));
    assert_eq!(
        registry.command(&id, USER, WORKSPACE, "cmd-1").unwrap().status,
        CommandStatus::Failed
    );

    // Sessions in error keep accepting work on the same tab.
    let screenshot = envelope(&id, 2, "tab_screenshot", Value::Null, 7);
    let next = registry.register_command(USER, WORKSPACE, &screenshot);
    assert!(next.is_accepted());
    assert_eq!(next.permission_scope.as_deref(), Some("tab_read:screenshot"));
}

#[test]
fn late_failure_after_close_does_not_reopen_the_session() {
    let mut registry = SessionRegistry::new();
    let id = registry.create(USER, WORKSPACE, "ext", false, None).session_id;
    assert!(read_info(&mut registry, &id, 1, 9).is_accepted());
    registry.close(&id, USER, WORKSPACE, Some("task_done")).unwrap();

    let error = AckError::protocol(ErrorCode::InvalidAck, "tab went away");
    let ack = finish(&mut registry, &id, TerminalStatus::Failed, Some(error));
    assert_eq!(ack.status(), CommandStatus::Failed);
    assert_eq!(ack.lifecycle_state, LifecycleState::Closed);
    assert_eq!(registry.open_sessions(), 0);

    let ack = read_info(&mut registry, &id, 2, 9);
    assert_eq!(ack.rejection_code(), Some(ErrorCode::InvalidTransition));
}

#[test]
fn privileged_urls_are_rejected_before_scope_checks() {
    let mut registry = SessionRegistry::new();
    let id = registry.create(USER, WORKSPACE, "ext", false, None).session_id;
    for url in [
        "chrome://settings",
        "chrome-extension://abc/popup.html",
        "edge://flags",
        "about:blank",
        "devtools://devtools/bundled/inspector.html",
        "view-source:https://example.com",
    ] {
        let mut env = envelope(&id, 1, "unknown_tool", json!({}), 1);
        env.target_tab = tab(1, url);
        let ack = registry.register_command(USER, WORKSPACE, &env);
        assert_eq!(ack.rejection_code(), Some(ErrorCode::NonInjectableTarget), "{url}");
    }
    assert_eq!(registry.get(&id, USER, WORKSPACE).unwrap().last_sequence, 0);
}

#[test]
fn sessions_are_invisible_to_other_tenants() {
    let mut registry = SessionRegistry::new();
    let id = registry.create(USER, WORKSPACE, "ext", false, None).session_id;

    assert!(registry.get(&id, "user-2", WORKSPACE).is_none());
    assert!(registry.get(&id, USER, "ws-2").is_none());
    assert!(registry.list_events(&id, "user-2", WORKSPACE, None).is_none());
    assert!(registry.close(&id, "user-2", WORKSPACE, None).is_none());

    let foreign = envelope(&id, 1, "tab_read", json!({}), 1);
    let ack = registry.register_command("user-2", WORKSPACE, &foreign);
    assert_eq!(ack.rejection_code(), Some(ErrorCode::SessionNotFound));
    assert_eq!(ack.lifecycle_state, LifecycleState::Error);
    assert_eq!(registry.list_events(&id, USER, WORKSPACE, None).unwrap().len(), 1);
}

#[test]
fn closed_sessions_refuse_new_commands() {
    let mut registry = SessionRegistry::new();
    let id = registry.create(USER, WORKSPACE, "ext", false, None).session_id;
    let closed = registry.close(&id, USER, WORKSPACE, Some("user_cancelled")).unwrap();
    assert_eq!(closed.lifecycle_state, LifecycleState::Closed);

    let ack = read_info(&mut registry, &id, 1, 1);
    assert_eq!(ack.rejection_code(), Some(ErrorCode::InvalidTransition));
    assert_eq!(ack.lifecycle_state, LifecycleState::Closed);
}
