use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use relay_proto::{
    Ack, CommandEnvelope, CommandReport, ErrorCode, Session, SessionEvent, TargetTab,
};
use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::state::{Actor, AppState};

pub mod auth;
pub mod sse;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(ready))
        .route("/metrics", get(metrics_handler))
        .route("/extension/sessions", post(create_session))
        .route("/extension/sessions/:session_id", get(get_session))
        .route("/extension/sessions/:session_id/close", post(close_session))
        .route(
            "/extension/sessions/:session_id/commands",
            post(register_command),
        )
        .route(
            "/extension/sessions/:session_id/commands/:command_id/ack",
            post(acknowledge_command),
        )
        .route("/extension/sessions/:session_id/events", get(list_events))
        .route(
            "/extension/sessions/:session_id/events/stream",
            get(sse::stream_events),
        )
        .with_state(state)
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(&'static str),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ApiErrorBody {
                    error: "unauthorized",
                    message: Some("missing caller identity".into()),
                }),
            )
                .into_response(),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(ApiErrorBody {
                    error: "not_found",
                    message: Some(format!("{what} not found")),
                }),
            )
                .into_response(),
        }
    }
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    uptime_secs: u64,
    open_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub extension_runtime_id: String,
    #[serde(default)]
    pub target_tab: Option<TargetTab>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseSessionRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        open_sessions: state.open_sessions(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain")],
        metrics::gather(),
    )
}

async fn create_session(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<Session> {
    let session =
        state.create_session(&actor, &body.extension_runtime_id, body.target_tab.as_ref());
    Ok(Json(session))
}

async fn get_session(
    State(state): State<AppState>,
    actor: Actor,
    Path(session_id): Path<String>,
) -> ApiResult<Session> {
    state
        .session(&actor, &session_id)
        .map(Json)
        .ok_or(ApiError::NotFound("session"))
}

async fn close_session(
    State(state): State<AppState>,
    actor: Actor,
    Path(session_id): Path<String>,
    body: Option<Json<CloseSessionRequest>>,
) -> ApiResult<Session> {
    let Json(body) = body.unwrap_or_default();
    state
        .close_session(&actor, &session_id, body.reason.as_deref())
        .map(Json)
        .ok_or(ApiError::NotFound("session"))
}

async fn register_command(
    State(state): State<AppState>,
    actor: Actor,
    Path(session_id): Path<String>,
    Json(mut envelope): Json<CommandEnvelope>,
) -> (StatusCode, Json<Ack>) {
    envelope.session_id = session_id;
    let ack = state.register_command(&actor, &envelope);
    (ack_status_code(&ack), Json(ack))
}

async fn acknowledge_command(
    State(state): State<AppState>,
    actor: Actor,
    Path((session_id, command_id)): Path<(String, String)>,
    Json(mut report): Json<CommandReport>,
) -> (StatusCode, Json<Ack>) {
    report.command_id = command_id;
    let ack = state.acknowledge_command(&actor, &session_id, report);
    (ack_status_code(&ack), Json(ack))
}

async fn list_events(
    State(state): State<AppState>,
    actor: Actor,
    Path(session_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Vec<SessionEvent>> {
    state
        .list_events(&actor, &session_id, query.limit)
        .map(Json)
        .ok_or(ApiError::NotFound("session"))
}

/// Refusals by the manager map onto HTTP; anything the extension reported
/// itself was recorded fine and answers 200.
fn ack_status_code(ack: &Ack) -> StatusCode {
    if ack.timestamps.finalized_at.is_some() {
        return StatusCode::OK;
    }
    match ack.rejection_code() {
        None => StatusCode::OK,
        Some(ErrorCode::SessionNotFound | ErrorCode::CommandNotFound) => StatusCode::NOT_FOUND,
        Some(
            ErrorCode::SequenceConflict
            | ErrorCode::SingleTabViolation
            | ErrorCode::InvalidTransition,
        ) => StatusCode::CONFLICT,
        Some(ErrorCode::SessionScopeDenied) => StatusCode::FORBIDDEN,
        Some(
            ErrorCode::UnsupportedCommand
            | ErrorCode::PermissionScopeInvalid
            | ErrorCode::NonInjectableTarget
            | ErrorCode::InvalidAck,
        ) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}
