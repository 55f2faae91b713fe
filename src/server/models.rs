use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::routes::{default_limit, MAX_PAGE_LIMIT};
use super::{failure_response, not_found, parse_body, parse_id, AppState};
use crate::models::{ModelUpdate, NewDataFile, NewModel};

#[derive(Debug, Deserialize)]
pub struct ListModelsParams {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub problem_type: Option<String>,
}

/// GET /api/v1/models
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListModelsParams>,
) -> Response {
    let limit = params.limit.min(MAX_PAGE_LIMIT);
    match state
        .model_store
        .list_models(params.skip, limit, params.problem_type)
        .await
    {
        Ok(models) => (StatusCode::OK, Json(models)).into_response(),
        Err(e) => failure_response(&e, "Failed to list models"),
    }
}

/// POST /api/v1/models
pub async fn create_model(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Response {
    let new_model: NewModel = match parse_body(&body, "model") {
        Ok(m) => m,
        Err(resp) => return resp,
    };
    match state.model_store.create_model(new_model).await {
        Ok(model) => {
            tracing::info!("Model '{}' created (id: {})", model.name, model.id);
            (StatusCode::CREATED, Json(model)).into_response()
        }
        Err(e) => failure_response(&e, "Model creation failed"),
    }
}

/// GET /api/v1/models/{id}
pub async fn get_model(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id, "model") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.model_store.get_model(id).await {
        Ok(Some(model)) => (StatusCode::OK, Json(model)).into_response(),
        Ok(None) => not_found("Model", id),
        Err(e) => failure_response(&e, "Failed to fetch model"),
    }
}

/// PUT /api/v1/models/{id}
pub async fn update_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let id = match parse_id(&id, "model") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let update: ModelUpdate = match parse_body(&body, "model update") {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    match state.model_store.update_model(id, update).await {
        Ok(model) => {
            tracing::info!("Model '{}' updated (id: {})", model.name, model.id);
            (StatusCode::OK, Json(model)).into_response()
        }
        Err(e) => failure_response(&e, "Model update failed"),
    }
}

/// DELETE /api/v1/models/{id}
pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id, "model") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.model_store.delete_model(id).await {
        Ok(()) => {
            tracing::info!("Model {} deleted", id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => failure_response(&e, "Model deletion failed"),
    }
}

/// GET /api/v1/models/{id}/data-files
pub async fn list_data_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id, "model") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.model_store.get_model(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Model", id),
        Err(e) => return failure_response(&e, "Failed to fetch model"),
    }
    match state.model_store.list_data_files(id).await {
        Ok(files) => (StatusCode::OK, Json(files)).into_response(),
        Err(e) => failure_response(&e, "Failed to list data files"),
    }
}

/// POST /api/v1/models/{id}/data-files
pub async fn create_data_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let id = match parse_id(&id, "model") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let new_file: NewDataFile = match parse_body(&body, "data file") {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match state.model_store.create_data_file(id, new_file).await {
        Ok(file) => {
            tracing::info!(
                "Data file '{}' created for model {} (id: {})",
                file.name,
                id,
                file.id
            );
            (StatusCode::CREATED, Json(file)).into_response()
        }
        Err(e) => failure_response(&e, "Data file creation failed"),
    }
}

/// DELETE /api/v1/models/{id}/data-files/{file_id}
pub async fn delete_data_file(
    State(state): State<Arc<AppState>>,
    Path((id, file_id)): Path<(String, String)>,
) -> Response {
    let id = match parse_id(&id, "model") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let file_id = match parse_id(&file_id, "data file") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.model_store.delete_data_file(id, file_id).await {
        Ok(()) => {
            tracing::info!("Data file {} deleted from model {}", file_id, id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => failure_response(&e, "Data file deletion failed"),
    }
}

/// POST /api/v1/models/{id}/validate
pub async fn validate_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id, "model") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let model = match state.model_store.get_model(id).await {
        Ok(Some(model)) => model,
        Ok(None) => return not_found("Model", id),
        Err(e) => return failure_response(&e, "Failed to fetch model"),
    };
    match state
        .orchestrator
        .engine()
        .validate_model(&model.model_content)
        .await
    {
        Ok(validation) => {
            tracing::debug!("Model {} validated (valid: {})", id, validation.valid);
            (StatusCode::OK, Json(validation)).into_response()
        }
        Err(e) => failure_response(&e, "Model validation failed"),
    }
}

/// GET /api/v1/models/{id}/info
///
/// Set sizes come from the model's first data file, if it has one.
pub async fn model_info(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id, "model") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let model = match state.model_store.get_model(id).await {
        Ok(Some(model)) => model,
        Ok(None) => return not_found("Model", id),
        Err(e) => return failure_response(&e, "Failed to fetch model"),
    };
    let data = match state.model_store.list_data_files(id).await {
        Ok(files) => files.into_iter().next().map(|file| file.file_content),
        Err(e) => return failure_response(&e, "Failed to list data files"),
    };
    match state
        .orchestrator
        .engine()
        .model_info(&model.model_content, data.as_deref())
        .await
    {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => failure_response(&e, "Model inspection failed"),
    }
}
