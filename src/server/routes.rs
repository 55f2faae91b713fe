use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::{failure_response, not_found, parse_body, parse_id, AppState};
use crate::models::{JobState, SolveRequest, SubmitResponse};

pub(crate) const DEFAULT_PAGE_LIMIT: usize = 100;
pub(crate) const MAX_PAGE_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Query params
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListResultsParams {
    pub model_id: Option<i64>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub(crate) fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

/// GET /api/v1/solver/solvers
pub async fn list_solvers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let solvers = state.orchestrator.engine().available_solvers().await;
    (StatusCode::OK, Json(solvers))
}

/// POST /api/v1/solver/run
pub async fn run_solver(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Response {
    let request: SolveRequest = match parse_body(&body, "solve request") {
        Ok(request) => request,
        Err(resp) => return resp,
    };

    let model_id = request.model_id;
    match state.orchestrator.submit(request).await {
        Ok(submission) => {
            tracing::info!(
                "Solve job {} submitted for model {} (run: {})",
                submission.job_id,
                model_id,
                submission.run_id
            );
            (
                StatusCode::OK,
                Json(SubmitResponse {
                    job_id: submission.job_id,
                    status: JobState::Queued,
                    message: "Optimization job queued".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => failure_response(&e, "Failed to submit solve job"),
    }
}

/// GET /api/v1/solver/status/{job_id}
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    match state.orchestrator.status(&job_id) {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => failure_response(&e, "Status lookup failed"),
    }
}

/// POST /api/v1/solver/cancel/{job_id}
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    match state.orchestrator.cancel(&job_id) {
        Ok(()) => {
            tracing::info!("Cancellation requested for job {}", job_id);
            (
                StatusCode::OK,
                Json(serde_json::json!({ "message": "Cancellation requested" })),
            )
                .into_response()
        }
        Err(e) => failure_response(&e, "Cancellation failed"),
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// GET /api/v1/solver/results
pub async fn list_results(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListResultsParams>,
) -> Response {
    let limit = params.limit.min(MAX_PAGE_LIMIT);
    match state
        .run_store
        .list_runs(params.model_id, params.skip, limit)
        .await
    {
        Ok((items, total)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": items,
                "total": total,
                "skip": params.skip,
                "limit": limit,
            })),
        )
            .into_response(),
        Err(e) => failure_response(&e, "Failed to list results"),
    }
}

/// GET /api/v1/solver/results/{id}
pub async fn get_result(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id, "result") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.run_store.get_run_detail(id).await {
        Ok(Some(detail)) => (StatusCode::OK, Json(detail)).into_response(),
        Ok(None) => not_found("Result", id),
        Err(e) => failure_response(&e, "Failed to fetch result"),
    }
}

/// DELETE /api/v1/solver/results/{id}
pub async fn delete_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id, "result") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.run_store.delete_run(id).await {
        Ok(()) => {
            tracing::info!("Result {} deleted", id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => failure_response(&e, "Failed to delete result"),
    }
}
