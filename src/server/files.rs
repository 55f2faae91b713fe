// Plain-text downloads of model and data file sources

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use super::{failure_response, not_found, parse_id, AppState};

fn attachment(filename: &str, content: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            ),
        ],
        content,
    )
        .into_response()
}

/// GET /api/v1/files/export/mod/{model_id}
pub async fn export_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> Response {
    let model_id = match parse_id(&model_id, "model") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.model_store.get_model(model_id).await {
        Ok(Some(model)) => attachment(&model.export_filename(), model.model_content),
        Ok(None) => not_found("Model", model_id),
        Err(e) => failure_response(&e, "Failed to fetch model"),
    }
}

/// GET /api/v1/files/export/dat/{data_file_id}
pub async fn export_data_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Response {
    let file_id = match parse_id(&file_id, "data file") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.model_store.get_data_file(file_id).await {
        Ok(Some(file)) => attachment(&file.export_filename(), file.file_content),
        Ok(None) => not_found("Data file", file_id),
        Err(e) => failure_response(&e, "Failed to fetch data file"),
    }
}
