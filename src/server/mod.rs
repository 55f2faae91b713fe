pub mod files;
pub mod health;
pub mod models;
pub mod routes;
pub mod sse;
pub mod visualization;
pub mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::daemon::events::SolveEvent;
use crate::daemon::orchestrator::Orchestrator;
use crate::errors::{lab_error, LabError};
use crate::models::LabConfig;
use crate::storage::{ModelStore, RunStore};

/// Shared application state for the Axum server.
pub struct AppState {
    pub model_store: Arc<dyn ModelStore>,
    pub run_store: Arc<dyn RunStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub event_tx: broadcast::Sender<SolveEvent>,
    pub config: Arc<LabConfig>,
    pub start_time: Instant,
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/solver/solvers", get(routes::list_solvers))
        .route("/api/v1/solver/run", post(routes::run_solver))
        .route("/api/v1/solver/status/{job_id}", get(routes::job_status))
        .route("/api/v1/solver/cancel/{job_id}", post(routes::cancel_job))
        .route("/api/v1/solver/ws/{job_id}", get(ws::solver_ws))
        .route("/api/v1/solver/results", get(routes::list_results))
        .route(
            "/api/v1/solver/results/{id}",
            get(routes::get_result).delete(routes::delete_result),
        )
        .route("/api/v1/events", get(sse::sse_handler))
        .route(
            "/api/v1/models",
            get(models::list_models).post(models::create_model),
        )
        .route(
            "/api/v1/models/{id}",
            get(models::get_model)
                .put(models::update_model)
                .delete(models::delete_model),
        )
        .route("/api/v1/models/{id}/validate", post(models::validate_model))
        .route("/api/v1/models/{id}/info", get(models::model_info))
        .route(
            "/api/v1/models/{id}/data-files",
            get(models::list_data_files).post(models::create_data_file),
        )
        .route(
            "/api/v1/models/{id}/data-files/{file_id}",
            axum::routing::delete(models::delete_data_file),
        )
        .route(
            "/api/v1/files/export/mod/{model_id}",
            get(files::export_model),
        )
        .route(
            "/api/v1/files/export/dat/{data_file_id}",
            get(files::export_data_file),
        )
        .route(
            "/api/v1/visualization/network/{result_id}",
            get(visualization::network),
        )
        .route(
            "/api/v1/visualization/sensitivity/{result_id}",
            get(visualization::sensitivity),
        )
        .route(
            "/api/v1/visualization/variables/{result_id}",
            get(visualization::variables),
        )
        .route(
            "/api/v1/visualization/comparison",
            get(visualization::comparison),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Any origin when `cors_origins` is empty, otherwise exactly the listed ones.
fn cors_layer(config: &LabConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

// ---------------------------------------------------------------------------
// Error responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub(crate) fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Map a failed store or orchestrator call onto `{error, message}`.
pub(crate) fn failure_response(err: &anyhow::Error, action: &str) -> Response {
    match lab_error(err) {
        Some(LabError::NotFound(msg)) => {
            tracing::warn!("{}: {}", action, msg);
            error_response(StatusCode::NOT_FOUND, "not_found", msg)
        }
        Some(LabError::Validation(msg)) => {
            tracing::warn!("{}: {}", action, msg);
            error_response(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        Some(LabError::Conflict(msg)) => {
            tracing::warn!("{}: {}", action, msg);
            error_response(StatusCode::CONFLICT, "conflict", msg)
        }
        Some(LabError::Engine(msg)) => {
            tracing::warn!("{}: {}", action, msg);
            error_response(StatusCode::UNPROCESSABLE_ENTITY, "engine_error", msg)
        }
        _ => {
            tracing::error!("{}: {:#}", action, err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                &format!("{}: {}", action, err),
            )
        }
    }
}

/// Parse a numeric path id, answering 400 in the usual error shape.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<i64, Response> {
    raw.parse::<i64>().map_err(|_| {
        tracing::warn!("Invalid {} id: '{}'", what, raw);
        error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            &format!("Invalid {} id: '{}'", what, raw),
        )
    })
}

/// Decode a JSON request body, answering 400 in the usual error shape.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("Rejected {}: {}", what, e);
        error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            &format!("Invalid {}: {}", what, e),
        )
    })
}

pub(crate) fn not_found(what: &str, id: i64) -> Response {
    tracing::warn!("{} {} not found", what, id);
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        &format!("{} {} not found", what, id),
    )
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::orchestrator::SolveDefaults;
    use crate::engine::MockSolveEngine;
    use crate::models::{
        JobState, NewModel, NewRun, SolveOutcome, SolveStatus, VariableValue,
    };
    use crate::storage::SqliteStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        state: Arc<AppState>,
        store: Arc<SqliteStore>,
        _tmp: TempDir,
    }

    async fn make_app(engine: MockSolveEngine) -> TestApp {
        make_app_with_config(engine, LabConfig::default()).await
    }

    async fn make_app_with_config(engine: MockSolveEngine, config: LabConfig) -> TestApp {
        let tmp = TempDir::new().expect("create temp dir");
        let store = Arc::new(
            SqliteStore::open(tmp.path().join("lab.db"))
                .await
                .expect("open store"),
        );
        let (event_tx, _) = broadcast::channel(256);
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            store.clone(),
            Arc::new(engine),
            event_tx.clone(),
            SolveDefaults {
                solver: config.default_solver.clone(),
                timeout_secs: config.default_timeout_secs,
            },
        ));
        let state = Arc::new(AppState {
            model_store: store.clone(),
            run_store: store.clone(),
            orchestrator,
            event_tx,
            config: Arc::new(config),
            start_time: Instant::now(),
        });
        TestApp {
            state,
            store,
            _tmp: tmp,
        }
    }

    fn optimal(objective: f64) -> SolveOutcome {
        let mut outcome = SolveOutcome::with_status(SolveStatus::Optimal);
        outcome.objective_value = Some(objective);
        outcome
    }

    async fn body_string(body: Body) -> String {
        let bytes = body.collect().await.expect("collect body").to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
        let router = create_router(Arc::clone(&app.state));
        let resp = router.oneshot(request).await.expect("oneshot");
        let status = resp.status();
        let text = body_string(resp.into_body()).await;
        let json = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn seed_model(app: &TestApp, name: &str) -> i64 {
        app.store
            .create_model(NewModel {
                name: name.to_string(),
                description: None,
                model_content: "var x >= 0; minimize z: x;".to_string(),
                problem_type: Some("LP".to_string()),
                tags: vec![],
                is_template: false,
            })
            .await
            .expect("create model")
            .id
    }

    async fn wait_finished(app: &TestApp, job_id: &str) -> Value {
        for _ in 0..100 {
            let (_, json) = send(app, get(&format!("/api/v1/solver/status/{}", job_id))).await;
            if json["status"] != "queued" && json["status"] != "running" {
                return json;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    // =======================================================================
    // Health
    // =======================================================================
    #[tokio::test]
    async fn test_health_returns_200_with_expected_fields() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let (status, json) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_seconds"].is_number());
        assert_eq!(json["active_jobs"], 0);
        assert_eq!(json["tracked_jobs"], 0);
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    // =======================================================================
    // Submission and status
    // =======================================================================
    #[tokio::test]
    async fn test_run_solver_returns_queued_and_completes() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(42.0))).await;
        let model_id = seed_model(&app, "transport").await;

        let (status, json) = send(
            &app,
            post_json("/api/v1/solver/run", json!({"model_id": model_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "queued");
        assert_eq!(json["message"], "Optimization job queued");
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let snapshot = wait_finished(&app, &job_id).await;
        assert_eq!(snapshot["status"], "completed");
        let result_id = snapshot["result_id"].as_i64().unwrap();

        let (status, json) = send(&app, get(&format!("/api/v1/solver/results/{}", result_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "optimal");
        assert_eq!(json["objective_value"], 42.0);
        assert_eq!(json["solver_name"], "highs");
    }

    #[tokio::test]
    async fn test_finished_job_reads_do_not_change() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(7.5))).await;
        let model_id = seed_model(&app, "m").await;
        let (_, json) = send(
            &app,
            post_json("/api/v1/solver/run", json!({"model_id": model_id})),
        )
        .await;
        let job_id = json["job_id"].as_str().unwrap().to_string();
        let first_status = wait_finished(&app, &job_id).await;
        let result_uri = format!("/api/v1/solver/results/{}", first_status["result_id"]);
        let (_, first_result) = send(&app, get(&result_uri)).await;

        for _ in 0..5 {
            let (status, json) = send(&app, get(&format!("/api/v1/solver/status/{}", job_id))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json, first_status);
            let (status, json) = send(&app, get(&result_uri)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json, first_result);
        }
    }

    #[tokio::test]
    async fn test_run_solver_unknown_model_returns_404() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let (status, json) = send(
            &app,
            post_json("/api/v1/solver/run", json!({"model_id": 999})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");

        let (_, json) = send(&app, get("/api/v1/solver/results")).await;
        assert_eq!(json["total"], 0);
    }

    #[tokio::test]
    async fn test_run_solver_validation_errors_return_400() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let model_id = seed_model(&app, "m").await;

        let bodies = vec![
            json!({"model_id": model_id, "timeout": 0}),
            json!({"model_id": model_id, "timeout": 3601}),
            json!({"model_id": model_id, "solver": ""}),
            json!({"model_id": model_id, "solver": "highs; shell 'x'"}),
            json!({"model_id": model_id, "solver": "2phase"}),
            json!({"model_id": model_id, "options": [1, 2]}),
            json!({"solver": "highs"}),
        ];
        for body in bodies {
            let (status, json) = send(&app, post_json("/api/v1/solver/run", body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
            assert_eq!(json["error"], "validation_error");
            assert!(json["message"].is_string());
        }

        let (_, json) = send(&app, get("/api/v1/solver/results")).await;
        assert_eq!(json["total"], 0);
    }

    #[tokio::test]
    async fn test_run_solver_malformed_body_returns_400() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/solver/run")
            .header("content-type", "application/json")
            .body(Body::from("{ nope"))
            .unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_failed_solve_reports_error() {
        let app = make_app(MockSolveEngine::with_outcome(SolveOutcome::failure(
            "solver crashed",
        )))
        .await;
        let model_id = seed_model(&app, "m").await;
        let (_, json) = send(
            &app,
            post_json("/api/v1/solver/run", json!({"model_id": model_id})),
        )
        .await;
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let snapshot = wait_finished(&app, &job_id).await;
        assert_eq!(snapshot["status"], "failed");
        assert_eq!(snapshot["error"], "solver crashed");

        let result_id = snapshot["result_id"].as_i64().unwrap();
        let (_, json) = send(&app, get(&format!("/api/v1/solver/results/{}", result_id))).await;
        assert_eq!(json["status"], "error");
        assert!(json["variables"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_unknown_job_returns_404() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let (status, json) = send(&app, get("/api/v1/solver/status/not-a-job")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/solver/cancel/not-a-job")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_job_marks_cancelled() {
        let app = make_app(MockSolveEngine::with_progress(optimal(2.0), vec![], 300)).await;
        let model_id = seed_model(&app, "m").await;
        let (_, json) = send(
            &app,
            post_json("/api/v1/solver/run", json!({"model_id": model_id})),
        )
        .await;
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/solver/cancel/{}", job_id))
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Cancellation requested");

        let snapshot = app.state.orchestrator.status(&job_id).unwrap();
        assert_eq!(snapshot.status, JobState::Cancelled);
    }

    // =======================================================================
    // Solvers
    // =======================================================================
    #[tokio::test]
    async fn test_list_solvers() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let (status, json) = send(&app, get("/api/v1/solver/solvers")).await;
        assert_eq!(status, StatusCode::OK);
        let solvers = json.as_array().unwrap();
        assert_eq!(solvers.len(), 7);
        assert_eq!(solvers[0]["name"], "highs");
        assert_eq!(solvers[0]["available"], true);
    }

    // =======================================================================
    // Results
    // =======================================================================
    async fn seed_run(app: &TestApp, model_id: i64, objective: f64) -> i64 {
        let run = app
            .store
            .create_run(NewRun {
                model_id,
                data_file_id: None,
                solver_name: "highs".to_string(),
                solver_options: serde_json::Map::new(),
            })
            .await
            .unwrap();
        app.store.mark_running(run.id).await.unwrap();
        let mut outcome = optimal(objective);
        outcome.variables.insert(
            "x".to_string(),
            vec![VariableValue {
                value: Some(objective),
                ..Default::default()
            }],
        );
        app.store.complete_run(run.id, &outcome).await.unwrap();
        run.id
    }

    #[tokio::test]
    async fn test_list_results_paginated_newest_first() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let model_id = seed_model(&app, "History Model").await;
        let first = seed_run(&app, model_id, 1.0).await;
        let second = seed_run(&app, model_id, 2.0).await;
        let third = seed_run(&app, model_id, 3.0).await;

        let (status, json) = send(&app, get("/api/v1/solver/results")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 3);
        assert_eq!(json["skip"], 0);
        assert_eq!(json["limit"], 100);
        let ids: Vec<i64> = json["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![third, second, first]);
        assert_eq!(json["items"][0]["model_name"], "History Model");

        let (_, json) = send(&app, get("/api/v1/solver/results?skip=1&limit=1")).await;
        assert_eq!(json["total"], 3);
        assert_eq!(json["items"].as_array().unwrap().len(), 1);
        assert_eq!(json["items"][0]["id"], second);
    }

    #[tokio::test]
    async fn test_list_results_filters_by_model_and_caps_limit() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let a = seed_model(&app, "a").await;
        let b = seed_model(&app, "b").await;
        seed_run(&app, a, 1.0).await;
        seed_run(&app, b, 2.0).await;

        let (_, json) = send(
            &app,
            get(&format!("/api/v1/solver/results?model_id={}&limit=5000", b)),
        )
        .await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["limit"], 1000);
        assert_eq!(json["items"][0]["model_id"], b);
    }

    #[tokio::test]
    async fn test_get_result_detail_and_delete() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let model_id = seed_model(&app, "m").await;
        let run_id = seed_run(&app, model_id, 5.0).await;

        let (status, json) = send(&app, get(&format!("/api/v1/solver/results/{}", run_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], run_id);
        assert_eq!(json["variables"].as_array().unwrap().len(), 1);
        assert_eq!(json["variables"][0]["variable_name"], "x");

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/solver/results/{}", run_id))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, get(&format!("/api/v1/solver/results/{}", run_id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_result_bad_id_returns_400() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let (status, json) = send(&app, get("/api/v1/solver/results/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    // =======================================================================
    // Models
    // =======================================================================
    #[tokio::test]
    async fn test_model_crud() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;

        let (status, json) = send(
            &app,
            post_json(
                "/api/v1/models",
                json!({"name": "diet", "model_content": "var x;", "problem_type": "LP", "tags": ["intro"]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = json["id"].as_i64().unwrap();
        assert_eq!(json["tags"], json!(["intro"]));

        let req = Request::builder()
            .method("PUT")
            .uri(format!("/api/v1/models/{}", id))
            .header("content-type", "application/json")
            .body(Body::from(json!({"description": "updated"}).to_string()))
            .unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["description"], "updated");
        assert_eq!(json["name"], "diet");

        let (_, json) = send(&app, get("/api/v1/models?problem_type=LP")).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        let (_, json) = send(&app, get("/api/v1/models?problem_type=MIP")).await;
        assert!(json.as_array().unwrap().is_empty());

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/models/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, json) = send(&app, get(&format!("/api/v1/models/{}", id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");
    }

    #[tokio::test]
    async fn test_create_model_invalid_returns_400() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let (status, json) = send(
            &app,
            post_json(
                "/api/v1/models",
                json!({"name": "", "model_content": "var x;"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_data_files_routes() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let model_id = seed_model(&app, "m").await;

        let (status, json) = send(
            &app,
            post_json(
                &format!("/api/v1/models/{}/data-files", model_id),
                json!({"name": "small", "file_content": "param n := 2;"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["file_type"], "dat");
        let file_id = json["id"].as_i64().unwrap();

        let (_, json) = send(&app, get(&format!("/api/v1/models/{}/data-files", model_id))).await;
        assert_eq!(json.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, get("/api/v1/models/999/data-files")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/models/{}/data-files/{}", model_id, file_id))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_validate_model_route() {
        let engine = MockSolveEngine::with_outcome(optimal(1.0));
        let app = make_app(engine).await;
        let model_id = seed_model(&app, "m").await;

        let (status, json) = send(
            &app,
            post_json(&format!("/api/v1/models/{}/validate", model_id), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"valid": true, "errors": []}));

        let (status, json) = send(&app, post_json("/api/v1/models/999/validate", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");
    }

    #[tokio::test]
    async fn test_validate_model_reports_errors() {
        let engine = MockSolveEngine::with_outcome(optimal(1.0));
        engine.set_validation_errors(vec!["syntax error near 'minimize'".to_string()]);
        let app = make_app(engine).await;
        let model_id = seed_model(&app, "m").await;

        let (status, json) = send(
            &app,
            post_json(&format!("/api/v1/models/{}/validate", model_id), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["valid"], false);
        assert_eq!(json["errors"], json!(["syntax error near 'minimize'"]));
    }

    #[tokio::test]
    async fn test_model_info_route() {
        use crate::models::{EntityName, ModelInfo, SetInfo};

        let engine = MockSolveEngine::with_outcome(optimal(1.0));
        engine.set_model_info(ModelInfo {
            sets: vec![SetInfo {
                name: "ORIG".to_string(),
                size: Some(3),
            }],
            variables: vec![EntityName::new("Trans")],
            ..ModelInfo::default()
        });
        let app = make_app(engine).await;
        let model_id = seed_model(&app, "m").await;

        let (status, json) = send(&app, get(&format!("/api/v1/models/{}/info", model_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sets"], json!([{"name": "ORIG", "size": 3}]));
        assert_eq!(json["variables"], json!([{"name": "Trans"}]));
        assert_eq!(json["constraints"], json!([]));

        let (status, _) = send(&app, get("/api/v1/models/999/info")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, get("/api/v1/models/abc/info")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_model_inspection_engine_failure_returns_422() {
        let app = make_app(MockSolveEngine::with_error("AMPL executable not found")).await;
        let model_id = seed_model(&app, "m").await;

        let (status, json) = send(&app, get(&format!("/api/v1/models/{}/info", model_id))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"], "engine_error");
        assert_eq!(json["message"], "AMPL executable not found");

        let (status, _) = send(
            &app,
            post_json(&format!("/api/v1/models/{}/validate", model_id), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_export_model_and_data_file() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let model_id = seed_model(&app, "transport model").await;
        let file = app
            .store
            .create_data_file(
                model_id,
                crate::models::NewDataFile {
                    name: "small".to_string(),
                    file_content: "param n := 2;".to_string(),
                    file_type: "dat".to_string(),
                },
            )
            .await
            .expect("create data file");

        let router = create_router(Arc::clone(&app.state));
        let resp = router
            .oneshot(get(&format!("/api/v1/files/export/mod/{}", model_id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert_eq!(
            resp.headers()["content-disposition"],
            "attachment; filename=transport_model.mod"
        );
        assert_eq!(
            body_string(resp.into_body()).await,
            "var x >= 0; minimize z: x;"
        );

        let router = create_router(Arc::clone(&app.state));
        let resp = router
            .oneshot(get(&format!("/api/v1/files/export/dat/{}", file.id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()["content-disposition"],
            "attachment; filename=small.dat"
        );
        assert_eq!(body_string(resp.into_body()).await, "param n := 2;");

        let (status, json) = send(&app, get("/api/v1/files/export/mod/999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["message"], "Model 999 not found");
        let (status, json) = send(&app, get("/api/v1/files/export/dat/999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["message"], "Data file 999 not found");
    }

    // =======================================================================
    // Visualization
    // =======================================================================
    #[tokio::test]
    async fn test_visualization_routes() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let model_id = seed_model(&app, "m").await;
        let run_id = seed_run(&app, model_id, 4.0).await;

        let (status, json) = send(
            &app,
            get(&format!("/api/v1/visualization/network/{}", run_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["edges"].as_array().unwrap().is_empty());
        assert!(json["reason"].is_string());

        let (status, json) = send(
            &app,
            get(&format!("/api/v1/visualization/variables/{}", run_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["variables"]["x"][0]["index"], json!(["scalar"]));

        let (status, _) = send(&app, get("/api/v1/visualization/sensitivity/999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(
            &app,
            get(&format!("/api/v1/visualization/comparison?result_ids={},999", run_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["results"].as_array().unwrap().len(), 1);
        assert_eq!(json["best_objective"], 4.0);

        let (status, json) = send(&app, get("/api/v1/visualization/comparison?result_ids=1,x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    // =======================================================================
    // Error format and CORS
    // =======================================================================
    #[tokio::test]
    async fn test_error_responses_match_format() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let (status, json) = send(&app, get("/api/v1/models/424242")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj["error"].is_string());
        assert!(obj["message"].is_string());
    }

    #[tokio::test]
    async fn test_cors_restricted_to_configured_origins() {
        let config = LabConfig {
            cors_origins: vec!["http://localhost:5173".to_string()],
            ..LabConfig::default()
        };
        let app = make_app_with_config(MockSolveEngine::with_outcome(optimal(1.0)), config).await;

        let router = create_router(Arc::clone(&app.state));
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("http://localhost:5173")
        );

        let router = create_router(Arc::clone(&app.state));
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://evil.example")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_submission_broadcasts_events() {
        let app = make_app(MockSolveEngine::with_outcome(optimal(1.0))).await;
        let mut rx = app.state.event_tx.subscribe();
        let model_id = seed_model(&app, "m").await;
        let (_, json) = send(
            &app,
            post_json("/api/v1/solver/run", json!({"model_id": model_id})),
        )
        .await;
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "queued");
        assert_eq!(event.job_id(), job_id);

        let body = serde_json::to_value(&event).unwrap();
        assert_eq!(body["event"], "Queued");
        assert_eq!(body["data"]["model_id"], model_id);
    }
}
