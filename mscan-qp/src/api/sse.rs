//! SSE event stream endpoint

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams ScanEvents (batch progress, item outcomes) to the admin
/// dashboard.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    mscan_common::sse::create_event_sse_stream("mscan-qp", &state.event_bus)
}
