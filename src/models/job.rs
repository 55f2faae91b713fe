use serde::{Deserialize, Serialize};
use serde_json::Value;

/// In-memory lifecycle state of a solve job, as reported to pollers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Point-in-time view of a job's status entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusSnapshot {
    pub job_id: String,
    pub status: JobState,
    pub progress: Option<Value>,
    pub result_id: Option<i64>,
    pub error: Option<String>,
}

/// Response to `POST /api/v1/solver/run`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobState,
    pub message: String,
}
