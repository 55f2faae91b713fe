use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::daemon::events::SolveEvent;
use crate::daemon::progress::ProgressHub;
use crate::daemon::status::JobStatusTable;
use crate::engine::{ProgressFn, SolveEngine};
use crate::errors::LabError;
use crate::models::solve::validate_solve_request;
use crate::models::{JobStatusSnapshot, NewRun, SolveInput, SolveRequest, SolveStatus};
use crate::storage::{ModelStore, RunStore};

/// Handle to a submitted solve job.
pub struct Submission {
    pub job_id: String,
    pub run_id: i64,
    pub join_handle: tokio::task::JoinHandle<()>,
}

/// Values applied when a request leaves solver or timeout unset.
#[derive(Debug, Clone)]
pub struct SolveDefaults {
    pub solver: String,
    pub timeout_secs: u64,
}

/// Accepts solve requests, runs them in the background and tracks their status.
pub struct Orchestrator {
    model_store: Arc<dyn ModelStore>,
    run_store: Arc<dyn RunStore>,
    engine: Arc<dyn SolveEngine>,
    statuses: Arc<JobStatusTable>,
    progress: Arc<ProgressHub>,
    event_tx: broadcast::Sender<SolveEvent>,
    defaults: SolveDefaults,
}

impl Orchestrator {
    pub fn new(
        model_store: Arc<dyn ModelStore>,
        run_store: Arc<dyn RunStore>,
        engine: Arc<dyn SolveEngine>,
        event_tx: broadcast::Sender<SolveEvent>,
        defaults: SolveDefaults,
    ) -> Self {
        Self {
            model_store,
            run_store,
            engine,
            statuses: Arc::new(JobStatusTable::new()),
            progress: Arc::new(ProgressHub::new()),
            event_tx,
            defaults,
        }
    }

    pub fn statuses(&self) -> &Arc<JobStatusTable> {
        &self.statuses
    }

    pub fn progress(&self) -> &Arc<ProgressHub> {
        &self.progress
    }

    pub fn engine(&self) -> &Arc<dyn SolveEngine> {
        &self.engine
    }

    /// Validate the request, create the queued run and spawn its execution.
    ///
    /// Nothing is created when validation or the model/data lookups fail.
    pub async fn submit(&self, request: SolveRequest) -> Result<Submission> {
        validate_solve_request(&request)?;

        let solver = request
            .solver
            .unwrap_or_else(|| self.defaults.solver.clone());
        let timeout_secs = request.timeout.unwrap_or(self.defaults.timeout_secs);

        let model = self
            .model_store
            .get_model(request.model_id)
            .await?
            .ok_or_else(|| LabError::NotFound(format!("Model {} not found", request.model_id)))?;

        let data_content = match request.data_file_id {
            Some(file_id) => Some(
                self.model_store
                    .get_data_file(file_id)
                    .await?
                    .ok_or_else(|| LabError::NotFound(format!("Data file {} not found", file_id)))?
                    .file_content,
            ),
            None => None,
        };

        let job_id = Uuid::new_v4().to_string();
        let run = self
            .run_store
            .create_run(NewRun {
                model_id: model.id,
                data_file_id: request.data_file_id,
                solver_name: solver.clone(),
                solver_options: request.options.clone(),
            })
            .await?;
        self.statuses.register(&job_id);

        let _ = self.event_tx.send(SolveEvent::Queued {
            job_id: job_id.clone(),
            run_id: run.id,
            model_id: model.id,
            solver: solver.clone(),
            timestamp: Utc::now(),
        });

        let input = SolveInput {
            model_content: model.model_content,
            data_content,
            solver,
            options: request.options,
            timeout_secs,
        };

        let task = JobTask {
            job_id: job_id.clone(),
            run_id: run.id,
            run_store: Arc::clone(&self.run_store),
            engine: Arc::clone(&self.engine),
            statuses: Arc::clone(&self.statuses),
            progress: Arc::clone(&self.progress),
            event_tx: self.event_tx.clone(),
        };

        let join_handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(task.execute(input)).catch_unwind().await;
            let failure = match result {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic),
            };
            task.record_failure(&failure).await;
        });

        Ok(Submission {
            job_id,
            run_id: run.id,
            join_handle,
        })
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatusSnapshot> {
        self.statuses
            .snapshot(job_id)
            .ok_or_else(|| LabError::NotFound(format!("Job {} not found", job_id)).into())
    }

    /// Mark the job cancelled and drop its push listener.
    ///
    /// Advisory only: the running solve is not interrupted and its run record
    /// still reaches a terminal state.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        if !self.statuses.cancel(job_id) {
            return Err(LabError::NotFound(format!("Job {} not found", job_id)).into());
        }
        self.progress.detach(job_id);
        let _ = self.event_tx.send(SolveEvent::Cancelled {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("Solve task panicked: {}", detail)
}

/// Everything one background execution needs, owned by its task.
struct JobTask {
    job_id: String,
    run_id: i64,
    run_store: Arc<dyn RunStore>,
    engine: Arc<dyn SolveEngine>,
    statuses: Arc<JobStatusTable>,
    progress: Arc<ProgressHub>,
    event_tx: broadcast::Sender<SolveEvent>,
}

impl JobTask {
    fn progress_callback(&self) -> ProgressFn {
        let job_id = self.job_id.clone();
        let run_id = self.run_id;
        let statuses = Arc::clone(&self.statuses);
        let progress = Arc::clone(&self.progress);
        let event_tx = self.event_tx.clone();
        Arc::new(move |payload: Value| {
            statuses.set_progress(&job_id, payload.clone());
            progress.send_progress(&job_id, payload.clone());
            let _ = event_tx.send(SolveEvent::Progress {
                job_id: job_id.clone(),
                run_id,
                payload,
                timestamp: Utc::now(),
            });
        })
    }

    async fn execute(&self, input: SolveInput) -> Result<()> {
        self.statuses.set_running(&self.job_id);
        self.run_store.mark_running(self.run_id).await?;
        let _ = self.event_tx.send(SolveEvent::Started {
            job_id: self.job_id.clone(),
            run_id: self.run_id,
            timestamp: Utc::now(),
        });

        let outcome = self
            .engine
            .solve(input, Some(self.progress_callback()))
            .await?;

        if outcome.status == SolveStatus::Error {
            let message = outcome
                .error_message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Solver reported an error".to_string());
            let output = Some(outcome.solver_output.as_str()).filter(|s| !s.is_empty());
            self.run_store
                .fail_run(self.run_id, &message, output)
                .await?;

            tracing::warn!(
                "Solve job {} (run {}) ended with solver error: {}",
                self.job_id,
                self.run_id,
                message
            );
            self.statuses.fail(&self.job_id, &message, Some(self.run_id));
            self.progress.send_error(&self.job_id, &message);
            let _ = self.event_tx.send(SolveEvent::Failed {
                job_id: self.job_id.clone(),
                run_id: self.run_id,
                error: message,
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        let run = self.run_store.complete_run(self.run_id, &outcome).await?;

        self.statuses.complete(&self.job_id, run.id);
        self.progress.send_completion(
            &self.job_id,
            json!({
                "result_id": run.id,
                "status": run.status,
                "objective_value": run.objective_value,
                "solve_time": run.solve_time,
                "variable_count": outcome.variable_count(),
                "constraint_count": outcome.constraint_count(),
            }),
        );
        let _ = self.event_tx.send(SolveEvent::Completed {
            job_id: self.job_id.clone(),
            run_id: run.id,
            status: run.status,
            objective_value: run.objective_value,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Convert an unexpected failure into state. Never propagates.
    async fn record_failure(&self, message: &str) {
        tracing::error!(
            "Solve job {} (run {}) failed: {}",
            self.job_id,
            self.run_id,
            message
        );
        self.statuses.fail(&self.job_id, message, Some(self.run_id));
        if let Err(e) = self.run_store.fail_run(self.run_id, message, None).await {
            tracing::warn!(
                "Could not record error status for run {}: {}",
                self.run_id,
                e
            );
        }
        self.progress.send_error(&self.job_id, message);
        let _ = self.event_tx.send(SolveEvent::Failed {
            job_id: self.job_id.clone(),
            run_id: self.run_id,
            error: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}
