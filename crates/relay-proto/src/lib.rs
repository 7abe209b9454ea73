//! Shared protocol definitions for relay manager ↔ browser extension communication.
//! Keeping this in a dedicated crate allows regeneration of bindings
//! for TypeScript without pulling in the manager runtime.
//!
//! Every record here is a plain JSON payload. The manager decides what
//! happens to a command; these types only describe what goes over the wire.

mod ack;
mod event;
mod session;

pub use ack::{
    Ack, AckError, AckErrorCode, AckOutcome, AckTimestamps, CommandReport, ErrorCode,
    TerminalStatus,
};
pub use event::{EventBody, EventKind, SessionEvent};
pub use session::{
    Capabilities, CommandEnvelope, CommandStatus, LifecycleState, PermissionMapping,
    SelectedTransport, Session, TargetTab, TransportDescriptor, TransportKind,
};

/// Protocol revision reported on every session.
pub const PROTOCOL_VERSION: &str = "v1";

/// The only command kind the extension runtime executes.
pub const COMMAND_KIND_TOOL_EXECUTE: &str = "tool_execute";

/// Permission namespaces a derived scope must fall under.
pub const PERMISSION_NAMESPACES: [&str; 2] = ["tab_read:*", "tab_action:*"];

pub const SCOPE_PREFIX_TAB_READ: &str = "tab_read:";
pub const SCOPE_PREFIX_TAB_ACTION: &str = "tab_action:";
