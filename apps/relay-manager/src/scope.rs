//! Least-privilege permission scopes for extension tool calls.
//!
//! A scope is `<namespace>:<capability>`. Callers compare it against the
//! session's permission namespaces; `None` means the tool is not one the
//! extension runtime knows how to run.

use std::collections::BTreeSet;

use relay_proto::{SCOPE_PREFIX_TAB_ACTION, SCOPE_PREFIX_TAB_READ};
use serde_json::Value;

const READ_MODES: [&str; 4] = ["dom", "screenshot", "elements", "info"];
const DEFAULT_READ_MODE: &str = "info";
const WILDCARD: &str = "*";

pub fn derive_permission_scope(tool_name: &str, arguments: &Value) -> Option<String> {
    match tool_name {
        "tab_read" => Some(read_scope(read_mode(arguments))),
        "tab_info" => Some(read_scope("info")),
        "tab_read_dom" => Some(read_scope("dom")),
        "tab_screenshot" => Some(read_scope("screenshot")),
        "tab_action" => Some(action_scope(&batch_action_kind(arguments))),
        "tab_click" => Some(action_scope("click")),
        "tab_type" => Some(action_scope("input")),
        "tab_scroll" => Some(action_scope("scroll")),
        _ => None,
    }
}

/// True when `scope` falls under one of the namespaces the manager grants.
pub fn is_grantable(scope: &str) -> bool {
    scope.starts_with(SCOPE_PREFIX_TAB_READ) || scope.starts_with(SCOPE_PREFIX_TAB_ACTION)
}

fn read_scope(mode: &str) -> String {
    format!("{SCOPE_PREFIX_TAB_READ}{mode}")
}

fn action_scope(kind: &str) -> String {
    format!("{SCOPE_PREFIX_TAB_ACTION}{kind}")
}

fn read_mode(arguments: &Value) -> &str {
    arguments
        .get("mode")
        .and_then(Value::as_str)
        .filter(|mode| READ_MODES.contains(mode))
        .unwrap_or(DEFAULT_READ_MODE)
}

/// Collapses a batch of steps into one capability. Mixed or empty batches
/// widen to the wildcard so the namespace allow-list still sees them.
fn batch_action_kind(arguments: &Value) -> String {
    let steps: Vec<&Value> = match arguments.get("actions").and_then(Value::as_array) {
        Some(actions) => actions.iter().collect(),
        None => arguments.get("action").into_iter().collect(),
    };

    let kinds: BTreeSet<String> = steps.into_iter().filter_map(step_kind).collect();
    let mut iter = kinds.into_iter();
    match (iter.next(), iter.next()) {
        (Some(kind), None) => kind,
        _ => WILDCARD.to_string(),
    }
}

fn step_kind(step: &Value) -> Option<String> {
    let raw = match step {
        Value::String(kind) => kind.as_str(),
        Value::Object(fields) => fields.get("action").and_then(Value::as_str)?,
        _ => return None,
    };
    Some(normalize_action(raw).to_string())
}

fn normalize_action(action: &str) -> &str {
    match action {
        "type" => "input",
        other => other,
    }
}
