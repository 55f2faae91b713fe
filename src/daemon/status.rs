use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::models::{JobState, JobStatusSnapshot};

struct StatusEntry {
    status: JobState,
    progress: Option<Value>,
    result_id: Option<i64>,
    error: Option<String>,
    touched: Instant,
}

impl StatusEntry {
    /// The execution task is done with this entry. A cancelled job counts only
    /// once its task has reported a result or an error.
    fn is_settled(&self) -> bool {
        match self.status {
            JobState::Completed | JobState::Failed => true,
            JobState::Cancelled => self.result_id.is_some() || self.error.is_some(),
            JobState::Queued | JobState::Running => false,
        }
    }
}

/// Transient map of job token to lifecycle state.
///
/// Every operation is atomic per key. A `cancelled` status is sticky: later
/// transitions still record `result_id` and `error` but leave the status alone.
/// Entries are lost on restart; the durable run record stays authoritative.
pub struct JobStatusTable {
    entries: RwLock<HashMap<String, StatusEntry>>,
}

impl Default for JobStatusTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStatusTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StatusEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, StatusEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update<F>(&self, job_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut StatusEntry),
    {
        let mut entries = self.write();
        match entries.get_mut(job_id) {
            Some(entry) => {
                f(entry);
                entry.touched = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn register(&self, job_id: &str) {
        self.write().insert(
            job_id.to_string(),
            StatusEntry {
                status: JobState::Queued,
                progress: None,
                result_id: None,
                error: None,
                touched: Instant::now(),
            },
        );
    }

    pub fn set_running(&self, job_id: &str) -> bool {
        self.update(job_id, |entry| {
            if entry.status != JobState::Cancelled {
                entry.status = JobState::Running;
            }
        })
    }

    /// Last write wins.
    pub fn set_progress(&self, job_id: &str, payload: Value) -> bool {
        self.update(job_id, |entry| entry.progress = Some(payload))
    }

    pub fn complete(&self, job_id: &str, result_id: i64) -> bool {
        self.update(job_id, |entry| {
            if entry.status != JobState::Cancelled {
                entry.status = JobState::Completed;
            }
            entry.result_id = Some(result_id);
        })
    }

    pub fn fail(&self, job_id: &str, error: &str, result_id: Option<i64>) -> bool {
        self.update(job_id, |entry| {
            if entry.status != JobState::Cancelled {
                entry.status = JobState::Failed;
            }
            entry.error = Some(error.to_string());
            if result_id.is_some() {
                entry.result_id = result_id;
            }
        })
    }

    /// Mark the job cancelled. Returns false for unknown tokens.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.update(job_id, |entry| entry.status = JobState::Cancelled)
    }

    pub fn snapshot(&self, job_id: &str) -> Option<JobStatusSnapshot> {
        self.read().get(job_id).map(|entry| JobStatusSnapshot {
            job_id: job_id.to_string(),
            status: entry.status,
            progress: entry.progress.clone(),
            result_id: entry.result_id,
            error: entry.error.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of jobs whose execution task has not finished yet, including
    /// cancelled jobs that are still solving.
    pub fn active_count(&self) -> usize {
        self.read()
            .values()
            .filter(|entry| !entry.is_settled())
            .count()
    }

    /// Drop settled entries untouched for longer than `ttl`. Returns how many went.
    pub fn evict_finished(&self, ttl: Duration) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !(entry.is_settled() && entry.touched.elapsed() > ttl));
        before - entries.len()
    }
}
