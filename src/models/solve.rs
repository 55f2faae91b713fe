use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::LabError;

pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Ordered index values of one entity instance, e.g. `["A", "B"]` for `ship['A','B']`.
pub type IndexTuple = Vec<Value>;

/// Normalized outcome status reported by a solve engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    Error,
    Unknown,
}

impl SolveStatus {
    /// Map raw engine text (e.g. AMPL's `solve_result`) to a status.
    pub fn normalize(raw: &str) -> Self {
        let status = raw.trim().to_lowercase();
        if status.contains("solved") || status.contains("optimal") {
            SolveStatus::Optimal
        } else if status.contains("infeasible") {
            SolveStatus::Infeasible
        } else if status.contains("unbounded") {
            SolveStatus::Unbounded
        } else if status.contains("error") || status.contains("fail") {
            SolveStatus::Error
        } else {
            SolveStatus::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::Unbounded => "unbounded",
            SolveStatus::Error => "error",
            SolveStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VariableValue {
    pub index: Option<IndexTuple>,
    pub value: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub reduced_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConstraintValue {
    pub index: Option<IndexTuple>,
    pub body: Option<f64>,
    pub dual: Option<f64>,
    pub slack: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
}

/// Structured result of one call into a solve engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    pub objective_value: Option<f64>,
    pub solve_time: Option<f64>,
    pub iterations: Option<i64>,
    pub nodes: Option<i64>,
    pub gap: Option<f64>,
    pub variables: BTreeMap<String, Vec<VariableValue>>,
    pub constraints: BTreeMap<String, Vec<ConstraintValue>>,
    pub solver_output: String,
    pub error_message: Option<String>,
}

impl SolveOutcome {
    pub fn with_status(status: SolveStatus) -> Self {
        Self {
            status,
            objective_value: None,
            solve_time: None,
            iterations: None,
            nodes: None,
            gap: None,
            variables: BTreeMap::new(),
            constraints: BTreeMap::new(),
            solver_output: String::new(),
            error_message: None,
        }
    }

    /// An `error` outcome carrying the message as both error and output text.
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            solver_output: message.clone(),
            error_message: Some(message),
            ..Self::with_status(SolveStatus::Error)
        }
    }

    pub fn variable_count(&self) -> usize {
        self.variables.values().map(Vec::len).sum()
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.values().map(Vec::len).sum()
    }
}

/// Everything an engine needs to run one solve.
#[derive(Debug, Clone)]
pub struct SolveInput {
    pub model_content: String,
    pub data_content: Option<String>,
    pub solver: String,
    pub options: Map<String, Value>,
    pub timeout_secs: u64,
}

/// Body of `POST /api/v1/solver/run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveRequest {
    pub model_id: i64,
    #[serde(default)]
    pub data_file_id: Option<i64>,
    #[serde(default)]
    pub solver: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// A plain AMPL name: ASCII letters, digits and `_`, not starting with a digit.
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

/// Validate the caller-supplied parts of a SolveRequest.
pub fn validate_solve_request(request: &SolveRequest) -> Result<(), LabError> {
    if let Some(ref solver) = request.solver {
        if solver.trim().is_empty() {
            return Err(LabError::Validation(
                "Solver name cannot be empty".to_string(),
            ));
        }
        if !is_identifier(solver) {
            return Err(LabError::Validation(format!(
                "Invalid solver name '{}'",
                solver
            )));
        }
    }
    if let Some(timeout) = request.timeout {
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout) {
            return Err(LabError::Validation(format!(
                "Timeout must be between {} and {} seconds, got {}",
                MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, timeout
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverInfo {
    pub name: String,
    pub available: bool,
    pub description: String,
    pub supports: Vec<String>,
}
