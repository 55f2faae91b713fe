// Chart-ready views over stored run results.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{error_response, failure_response, not_found, parse_id, AppState};
use crate::errors::LabError;
use crate::models::{ConstraintResult, IndexTuple, Run, RunDetail, RunStatus, VariableResult};

const FLOW_EPSILON: f64 = 0.001;
const BINDING_DUAL_EPSILON: f64 = 0.001;

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkEdge {
    pub source: String,
    pub target: String,
    pub flow: f64,
    pub capacity: f64,
    pub variable: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkSummary {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub total_flow: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkView {
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
    pub reason: Option<String>,
    pub summary: NetworkSummary,
}

fn index_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Treat every two-index variable as a flow from its first to its second index.
pub fn network_view(variables: &[VariableResult]) -> NetworkView {
    let mut nodes = Vec::new();
    let mut seen = HashSet::new();
    let mut edges = Vec::new();

    for var in variables {
        let [source, target] = match var.variable_index.as_deref() {
            Some([source, target]) => [index_label(source), index_label(target)],
            _ => continue,
        };

        for (id, kind) in [(&source, "source"), (&target, "sink")] {
            if seen.insert(id.clone()) {
                nodes.push(NetworkNode {
                    id: id.clone(),
                    label: id.clone(),
                    kind: kind.to_string(),
                });
            }
        }

        if let Some(flow) = var.value.filter(|v| *v > FLOW_EPSILON) {
            edges.push(NetworkEdge {
                source,
                target,
                flow,
                capacity: var.upper_bound.filter(|u| *u != 0.0).unwrap_or(flow * 2.0),
                variable: var.variable_name.clone(),
            });
        }
    }

    let reason = edges
        .is_empty()
        .then(|| "No 2-index flow variables with positive values were found.".to_string());
    let summary = NetworkSummary {
        total_nodes: nodes.len(),
        total_edges: edges.len(),
        total_flow: edges.iter().map(|e| e.flow).sum(),
    };
    NetworkView {
        nodes,
        edges,
        reason,
        summary,
    }
}

// ---------------------------------------------------------------------------
// Sensitivity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ShadowPrice {
    pub constraint: String,
    pub index: Option<IndexTuple>,
    pub dual: f64,
    pub slack: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReducedCost {
    pub variable: String,
    pub index: Option<IndexTuple>,
    pub value: Option<f64>,
    pub reduced_cost: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SensitivityView {
    pub shadow_prices: Vec<ShadowPrice>,
    pub reduced_costs: Vec<ReducedCost>,
    pub binding_constraints: Vec<ShadowPrice>,
}

pub fn sensitivity_view(
    variables: &[VariableResult],
    constraints: &[ConstraintResult],
) -> SensitivityView {
    let shadow_prices: Vec<ShadowPrice> = constraints
        .iter()
        .filter_map(|con| {
            let dual = con.dual.filter(|d| *d != 0.0)?;
            Some(ShadowPrice {
                constraint: con.constraint_name.clone(),
                index: con.constraint_index.clone(),
                dual,
                slack: con.slack,
            })
        })
        .collect();

    let reduced_costs = variables
        .iter()
        .filter_map(|var| {
            let reduced_cost = var.reduced_cost.filter(|rc| *rc != 0.0)?;
            Some(ReducedCost {
                variable: var.variable_name.clone(),
                index: var.variable_index.clone(),
                value: var.value,
                reduced_cost,
            })
        })
        .collect();

    let binding_constraints = shadow_prices
        .iter()
        .filter(|sp| sp.slack == Some(0.0) || sp.dual.abs() > BINDING_DUAL_EPSILON)
        .cloned()
        .collect();

    SensitivityView {
        shadow_prices,
        reduced_costs,
        binding_constraints,
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChartPoint {
    pub index: IndexTuple,
    pub value: Option<f64>,
    pub label: String,
}

/// Group variable rows by name. Scalar rows get index `["scalar"]`.
pub fn variables_view(
    variables: &[VariableResult],
    name: Option<&str>,
) -> BTreeMap<String, Vec<ChartPoint>> {
    let mut grouped: BTreeMap<String, Vec<ChartPoint>> = BTreeMap::new();
    for var in variables {
        if name.is_some_and(|n| n != var.variable_name) {
            continue;
        }
        let point = match var.variable_index.as_ref().filter(|idx| !idx.is_empty()) {
            Some(index) => ChartPoint {
                label: index.iter().map(index_label).collect::<Vec<_>>().join(", "),
                index: index.clone(),
                value: var.value,
            },
            None => ChartPoint {
                index: vec![Value::from("scalar")],
                value: var.value,
                label: var.variable_name.clone(),
            },
        };
        grouped
            .entry(var.variable_name.clone())
            .or_default()
            .push(point);
    }
    grouped
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComparedRun {
    pub id: i64,
    pub solver: String,
    pub status: RunStatus,
    pub objective: Option<f64>,
    pub solve_time: Option<f64>,
    pub iterations: Option<i64>,
    pub gap: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComparisonView {
    pub results: Vec<ComparedRun>,
    pub best_objective: Option<f64>,
    pub fastest_solver: Option<ComparedRun>,
}

/// Parse `1,2,3` into ids.
pub fn parse_result_ids(raw: &str) -> Result<Vec<i64>, LabError> {
    raw.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<i64>()
                .map_err(|_| LabError::Validation(format!("Invalid result id '{}'", part)))
        })
        .collect()
}

pub fn comparison_view(runs: &[Run]) -> ComparisonView {
    let results: Vec<ComparedRun> = runs
        .iter()
        .map(|run| ComparedRun {
            id: run.id,
            solver: run.solver_name.clone(),
            status: run.status,
            objective: run.objective_value,
            solve_time: run.solve_time,
            iterations: run.iterations,
            gap: run.gap,
        })
        .collect();

    let best_objective = results
        .iter()
        .filter_map(|r| r.objective.filter(|o| *o != 0.0))
        .reduce(f64::max);

    // First run with the smallest time; missing times sort last
    let mut fastest: Option<&ComparedRun> = None;
    for run in &results {
        let time = run.solve_time.unwrap_or(f64::INFINITY);
        let faster = match fastest {
            Some(f) => time < f.solve_time.unwrap_or(f64::INFINITY),
            None => true,
        };
        if faster {
            fastest = Some(run);
        }
    }

    ComparisonView {
        best_objective,
        fastest_solver: fastest.cloned(),
        results,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn load_detail(state: &AppState, raw_id: &str) -> Result<RunDetail, Response> {
    let id = parse_id(raw_id, "result")?;
    match state.run_store.get_run_detail(id).await {
        Ok(Some(detail)) => Ok(detail),
        Ok(None) => Err(not_found("Result", id)),
        Err(e) => Err(failure_response(&e, "Failed to fetch result")),
    }
}

/// GET /api/v1/visualization/network/{result_id}
pub async fn network(
    State(state): State<Arc<AppState>>,
    Path(result_id): Path<String>,
) -> Response {
    match load_detail(&state, &result_id).await {
        Ok(detail) => (StatusCode::OK, Json(network_view(&detail.variables))).into_response(),
        Err(resp) => resp,
    }
}

/// GET /api/v1/visualization/sensitivity/{result_id}
pub async fn sensitivity(
    State(state): State<Arc<AppState>>,
    Path(result_id): Path<String>,
) -> Response {
    match load_detail(&state, &result_id).await {
        Ok(detail) => (
            StatusCode::OK,
            Json(sensitivity_view(&detail.variables, &detail.constraints)),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct VariablesParams {
    pub variable_name: Option<String>,
}

/// GET /api/v1/visualization/variables/{result_id}
pub async fn variables(
    State(state): State<Arc<AppState>>,
    Path(result_id): Path<String>,
    Query(params): Query<VariablesParams>,
) -> Response {
    match load_detail(&state, &result_id).await {
        Ok(detail) => {
            let grouped = variables_view(&detail.variables, params.variable_name.as_deref());
            (
                StatusCode::OK,
                Json(serde_json::json!({ "variables": grouped })),
            )
                .into_response()
        }
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ComparisonParams {
    pub result_ids: Option<String>,
}

/// GET /api/v1/visualization/comparison?result_ids=1,2,3
pub async fn comparison(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ComparisonParams>,
) -> Response {
    let Some(raw) = params.result_ids else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "result_ids is required",
        );
    };
    let ids = match parse_result_ids(&raw) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!("Rejected comparison request: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "validation_error", &e.to_string());
        }
    };

    let mut runs = Vec::with_capacity(ids.len());
    for id in ids {
        match state.run_store.get_run(id).await {
            Ok(Some(run)) => runs.push(run),
            Ok(None) => {}
            Err(e) => return failure_response(&e, "Failed to fetch result"),
        }
    }

    (StatusCode::OK, Json(comparison_view(&runs))).into_response()
}
