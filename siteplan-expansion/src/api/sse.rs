//! GET /events: job events as Server-Sent Events

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// Streams JobQueued, JobStageChanged, JobProgress, SuggestionDemoted and
/// JobFinished with a 15 s heartbeat. Polling `GET /jobs/{id}` stays the
/// source of truth; a lagging client may miss events.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    siteplan_common::sse::create_event_sse_stream("siteplan-expansion", &state.event_bus)
}
