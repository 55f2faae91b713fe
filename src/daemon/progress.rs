use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Message pushed to a job's listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    Progress { job_id: String, data: Value },
    Complete { job_id: String, result: Value },
    Error { job_id: String, error: String },
    Cancelled { job_id: String },
}

/// Per-job push channel registry. At most one listener per job token.
///
/// Sends are best effort: a listener whose receiving side is gone is
/// detached and the send is dropped. Pollers fall back to the status table.
#[derive(Default)]
pub struct ProgressHub {
    listeners: Mutex<HashMap<String, mpsc::UnboundedSender<PushMessage>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<PushMessage>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a listener for `job_id`, replacing any previous one.
    pub fn attach(&self, job_id: &str) -> mpsc::UnboundedReceiver<PushMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.listeners().insert(job_id.to_string(), tx).is_some() {
            tracing::debug!("Replaced push listener for job {}", job_id);
        }
        rx
    }

    pub fn detach(&self, job_id: &str) {
        self.listeners().remove(job_id);
    }

    /// Drop the listener for `job_id` only if its receiving side is gone.
    ///
    /// Leaves a replacement listener attached.
    pub fn release(&self, job_id: &str) {
        let mut listeners = self.listeners();
        if listeners.get(job_id).is_some_and(|tx| tx.is_closed()) {
            listeners.remove(job_id);
        }
    }

    pub fn is_attached(&self, job_id: &str) -> bool {
        self.listeners().contains_key(job_id)
    }

    fn send(&self, job_id: &str, message: PushMessage) -> bool {
        let mut listeners = self.listeners();
        let Some(tx) = listeners.get(job_id) else {
            return false;
        };
        if tx.send(message).is_err() {
            tracing::debug!("Push listener for job {} is gone, detaching", job_id);
            listeners.remove(job_id);
            return false;
        }
        true
    }

    pub fn send_progress(&self, job_id: &str, data: Value) -> bool {
        self.send(
            job_id,
            PushMessage::Progress {
                job_id: job_id.to_string(),
                data,
            },
        )
    }

    /// Push the completion summary, then detach.
    pub fn send_completion(&self, job_id: &str, result: Value) -> bool {
        let sent = self.send(
            job_id,
            PushMessage::Complete {
                job_id: job_id.to_string(),
                result,
            },
        );
        self.detach(job_id);
        sent
    }

    /// Push the error, then detach.
    pub fn send_error(&self, job_id: &str, error: &str) -> bool {
        let sent = self.send(
            job_id,
            PushMessage::Error {
                job_id: job_id.to_string(),
                error: error.to_string(),
            },
        );
        self.detach(job_id);
        sent
    }
}
