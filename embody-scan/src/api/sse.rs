//! Server-Sent Events (SSE) for scan progress streaming
//!
//! Real-time scan progress for the capture and processing UI. Every event on
//! the bus is scan-scoped, so the stream forwards all of them unless the
//! client narrows to a single scan with `?scan_id=`.

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// GET /scan/events query parameters
#[derive(Debug, Deserialize)]
pub struct EventStreamParams {
    /// Restrict the stream to events for one scan
    pub scan_id: Option<String>,
}

/// GET /scan/events - SSE event stream for scan progress
///
/// Streams events:
/// - ScanSessionStarted / ScanPhaseChanged / ScanProgressUpdate
/// - ProgressChime (haptic/audio cue bands)
/// - StageStarted / StageCompleted / StageFailed
/// - ScanCompleted / ScanFailed / PersistenceAnomaly
pub async fn scan_event_stream(
    State(state): State<AppState>,
    Query(params): Query<EventStreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(filter = ?params.scan_id, "New SSE client connected to scan events");

    // Subscribe to event broadcast
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        debug!("SSE: Scan event stream started");

        loop {
            tokio::select! {
                // Heartbeat every 15 seconds
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                // Broadcast events
                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            if let Some(wanted) = &params.scan_id {
                                if event.scan_id() != wanted {
                                    continue;
                                }
                            }

                            let event_type = event.event_type();
                            match serde_json::to_string(&event) {
                                Ok(event_json) => {
                                    yield Ok(Event::default()
                                        .event(event_type)
                                        .data(event_json));
                                }
                                Err(e) => {
                                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Client fell behind; resume from the current tail
                            warn!("SSE: Client lagged, {} events skipped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("SSE: Event bus closed, ending stream");
                            break;
                        }
                    }
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
