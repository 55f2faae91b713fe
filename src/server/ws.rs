use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use serde_json::json;
use tokio::sync::mpsc;

use super::AppState;
use crate::daemon::progress::PushMessage;
use crate::models::{JobState, JobStatusSnapshot};

/// GET /api/v1/solver/ws/{job_id}
pub async fn solver_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| push_session(socket, state, job_id))
}

enum Step {
    Push(Option<PushMessage>),
    Incoming(Option<Result<Message, axum::Error>>),
}

/// How a freshly attached session starts.
#[derive(Debug)]
enum Opening {
    /// The job is still queued or running; relay its messages.
    Relay,
    /// The job finished before the socket attached.
    Settled(JobStatusSnapshot),
    /// The token is unknown or its entry was evicted.
    Untracked,
}

fn opening(snapshot: Option<JobStatusSnapshot>) -> Opening {
    match snapshot {
        Some(snapshot) if snapshot.status.is_finished() => Opening::Settled(snapshot),
        Some(_) => Opening::Relay,
        None => Opening::Untracked,
    }
}

fn untracked_message(job_id: &str) -> PushMessage {
    PushMessage::Error {
        job_id: job_id.to_string(),
        error: format!("Job {} not found", job_id),
    }
}

fn is_final(message: &PushMessage) -> bool {
    matches!(
        message,
        PushMessage::Complete { .. } | PushMessage::Error { .. } | PushMessage::Cancelled { .. }
    )
}

/// Final message for a job that finished before the socket attached.
fn settled_message(snapshot: &JobStatusSnapshot) -> Option<PushMessage> {
    let job_id = snapshot.job_id.clone();
    match snapshot.status {
        JobState::Completed => Some(PushMessage::Complete {
            job_id,
            result: json!({ "result_id": snapshot.result_id }),
        }),
        JobState::Failed => Some(PushMessage::Error {
            job_id,
            error: snapshot.error.clone().unwrap_or_default(),
        }),
        JobState::Cancelled => Some(PushMessage::Cancelled { job_id }),
        JobState::Queued | JobState::Running => None,
    }
}

async fn send_message(socket: &mut WebSocket, message: &PushMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to encode push message: {}", e);
            return false;
        }
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

/// Forward anything already queued for a finished job, then its final state.
async fn flush_settled(
    socket: &mut WebSocket,
    rx: &mut mpsc::UnboundedReceiver<PushMessage>,
    snapshot: &JobStatusSnapshot,
) {
    let mut sent_final = false;
    while let Ok(message) = rx.try_recv() {
        sent_final |= is_final(&message);
        if !send_message(socket, &message).await {
            return;
        }
    }
    if !sent_final {
        if let Some(message) = settled_message(snapshot) {
            send_message(socket, &message).await;
        }
    }
}

async fn push_session(mut socket: WebSocket, state: Arc<AppState>, job_id: String) {
    tracing::debug!("Push listener connected for job {}", job_id);
    let hub = Arc::clone(state.orchestrator.progress());
    let mut rx = hub.attach(&job_id);

    match opening(state.orchestrator.statuses().snapshot(&job_id)) {
        Opening::Relay => {}
        Opening::Settled(snapshot) => {
            flush_settled(&mut socket, &mut rx, &snapshot).await;
            drop(rx);
            hub.release(&job_id);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        Opening::Untracked => {
            tracing::debug!("Push listener rejected for untracked job {}", job_id);
            send_message(&mut socket, &untracked_message(&job_id)).await;
            drop(rx);
            hub.release(&job_id);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }

    loop {
        let step = tokio::select! {
            pushed = rx.recv() => Step::Push(pushed),
            incoming = socket.recv() => Step::Incoming(incoming),
        };

        match step {
            Step::Push(Some(message)) => {
                let done = is_final(&message);
                if !send_message(&mut socket, &message).await {
                    tracing::debug!("Push listener for job {} went away", job_id);
                    break;
                }
                if done {
                    break;
                }
            }
            // Detached: replaced by a newer listener or the job was cancelled
            Step::Push(None) => break,
            Step::Incoming(Some(Ok(Message::Text(text)))) if text.as_str() == "cancel" => {
                let ack = PushMessage::Cancelled {
                    job_id: job_id.clone(),
                };
                send_message(&mut socket, &ack).await;
                if let Err(e) = state.orchestrator.cancel(&job_id) {
                    tracing::debug!("Cancel over push channel for job {}: {}", job_id, e);
                }
                break;
            }
            Step::Incoming(Some(Ok(Message::Close(_)))) | Step::Incoming(None) => break,
            Step::Incoming(Some(Err(e))) => {
                tracing::debug!("Push socket error for job {}: {}", job_id, e);
                break;
            }
            Step::Incoming(Some(Ok(_))) => {}
        }
    }

    drop(rx);
    hub.release(&job_id);
    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!("Push listener for job {} closed", job_id);
}
