use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct SseParams {
    pub job_id: Option<String>,
}

/// Logs at debug level when the SSE stream is dropped (client disconnects).
struct SseDropGuard;

impl Drop for SseDropGuard {
    fn drop(&mut self) {
        tracing::debug!("SSE client disconnected");
    }
}

/// GET /api/v1/events
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SseParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("SSE client connected");

    let rx = state.event_tx.subscribe();
    let filter_job_id = params.job_id;

    let _drop_guard = SseDropGuard;

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let _ = &_drop_guard;
        match result {
            Ok(event) => {
                if let Some(ref fj) = filter_job_id {
                    if event.job_id() != fj {
                        return None;
                    }
                }
                match serde_json::to_string(&event) {
                    Ok(data) => Some(Ok(Event::default().event(event.kind()).data(data))),
                    Err(_) => None,
                }
            }
            // Lagged: tell the client and keep going
            Err(_) => Some(Ok(
                Event::default().comment("lagged: some events were missed")
            )),
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
