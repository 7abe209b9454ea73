use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_core::Stream;
use relay_proto::SessionEvent;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::state::{Actor, AppState};

use super::ApiError;

/// Live session events as SSE, one event per log entry, named after its type.
/// Slow readers skip what they missed; the polling endpoint covers catch-up.
pub async fn stream_events(
    State(state): State<AppState>,
    actor: Actor,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state
        .subscribe(&actor, &session_id)
        .ok_or(ApiError::NotFound("session"))?;
    let stream = BroadcastStream::new(rx)
        .filter_map(move |msg| match msg {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(session_id = %session_id, skipped, "event stream lagged");
                None
            }
        })
        .filter_map(|event| to_sse_event(&event).map(Ok::<_, Infallible>));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.sse_keepalive())))
}

fn to_sse_event(event: &SessionEvent) -> Option<Event> {
    let (name, data) = event.as_named_json();
    let Some(data) = data else {
        warn!(index = event.index, event = name, "dropping unserializable session event");
        return None;
    };
    Some(
        Event::default()
            .event(name)
            .id(event.index.to_string())
            .data(data),
    )
}
