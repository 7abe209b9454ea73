pub mod config;
pub mod event_log;
pub mod finalizer;
pub mod metrics;
pub mod registry;
pub mod routes;
pub mod scope;
pub mod sequencer;
pub mod state;
pub mod telemetry;

pub use registry::{CommandRecord, EventSink, SessionRegistry};
pub use state::{Actor, AppState};
