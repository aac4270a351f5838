//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE implementations for MusicScan services.

use crate::events::EventBus;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Create an SSE stream forwarding ScanEvents from the event bus
///
/// Each event is serialized as JSON with its `type` tag as the SSE event
/// name. A heartbeat comment is sent on the keep-alive interval so proxies
/// do not drop idle connections.
pub fn create_event_sse_stream(
    service_name: &'static str,
    event_bus: &EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);

    let mut rx = event_bus.subscribe();

    let stream = async_stream::stream! {
        // Send initial connected status
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            debug!("SSE: forwarding event");
                            yield Ok(Event::default().data(json));
                        }
                        Err(e) => {
                            warn!(error = %e, "SSE: failed to serialize event, skipping");
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE: client lagged, events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("SSE: event bus closed, ending stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
