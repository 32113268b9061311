//! Server-sent stream of node status changes

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::models::NodeStatus;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Live node status events, one `data: {json}` frame per change
#[utoipa::path(
    get,
    path = "/nodes/events",
    tag = "nodes",
    responses(
        (status = 200, description = "text/event-stream of NodeStatus", body = NodeStatus, content_type = "text/event-stream")
    )
)]
pub async fn status_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(subscribers = state.status.subscriber_count() + 1, "Status subscriber connected");

    let stream = state
        .status
        .subscribe()
        .into_stream()
        .take_until(state.shutdown.clone().cancelled_owned())
        .filter_map(|status| async move {
            match Event::default().json_data(&status) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    warn!(node_id = %status.id, error = %e, "Failed to encode status event");
                    None
                }
            }
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
