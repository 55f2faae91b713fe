use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    /// Jobs still queued or running.
    pub active_jobs: usize,
    /// Entries currently held in the status table.
    pub tracked_jobs: usize,
    pub version: String,
    pub data_dir: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Health check");

    let statuses = state.orchestrator.statuses();
    let data_dir = state
        .config
        .data_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let response = HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_jobs: statuses.active_count(),
        tracked_jobs: statuses.len(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_dir,
    };

    (StatusCode::OK, Json(response))
}
