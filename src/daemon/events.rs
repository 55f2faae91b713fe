use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::RunStatus;

/// Lifecycle events broadcast to SSE clients and the event logger.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum SolveEvent {
    Queued {
        job_id: String,
        run_id: i64,
        model_id: i64,
        solver: String,
        timestamp: DateTime<Utc>,
    },
    Started {
        job_id: String,
        run_id: i64,
        timestamp: DateTime<Utc>,
    },
    Progress {
        job_id: String,
        run_id: i64,
        payload: Value,
        timestamp: DateTime<Utc>,
    },
    Completed {
        job_id: String,
        run_id: i64,
        status: RunStatus,
        objective_value: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    Failed {
        job_id: String,
        run_id: i64,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl SolveEvent {
    pub fn job_id(&self) -> &str {
        match self {
            SolveEvent::Queued { job_id, .. }
            | SolveEvent::Started { job_id, .. }
            | SolveEvent::Progress { job_id, .. }
            | SolveEvent::Completed { job_id, .. }
            | SolveEvent::Failed { job_id, .. }
            | SolveEvent::Cancelled { job_id, .. } => job_id,
        }
    }

    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            SolveEvent::Queued { .. } => "queued",
            SolveEvent::Started { .. } => "started",
            SolveEvent::Progress { .. } => "progress",
            SolveEvent::Completed { .. } => "completed",
            SolveEvent::Failed { .. } => "failed",
            SolveEvent::Cancelled { .. } => "cancelled",
        }
    }
}
