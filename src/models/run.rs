use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::solve::{IndexTuple, SolveStatus};

/// Durable status of an optimization run.
///
/// Moves forward only: `queued -> running -> terminal`. Terminal statuses
/// are never overwritten.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Optimal,
    Infeasible,
    Unbounded,
    Error,
    Unknown,
}

impl RunStatus {
    pub const TERMINAL: [RunStatus; 5] = [
        RunStatus::Optimal,
        RunStatus::Infeasible,
        RunStatus::Unbounded,
        RunStatus::Error,
        RunStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Optimal => "optimal",
            RunStatus::Infeasible => "infeasible",
            RunStatus::Unbounded => "unbounded",
            RunStatus::Error => "error",
            RunStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Queued | RunStatus::Running)
    }
}

impl From<SolveStatus> for RunStatus {
    fn from(status: SolveStatus) -> Self {
        match status {
            SolveStatus::Optimal => RunStatus::Optimal,
            SolveStatus::Infeasible => RunStatus::Infeasible,
            SolveStatus::Unbounded => RunStatus::Unbounded,
            SolveStatus::Error => RunStatus::Error,
            SolveStatus::Unknown => RunStatus::Unknown,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "optimal" => Ok(RunStatus::Optimal),
            "infeasible" => Ok(RunStatus::Infeasible),
            "unbounded" => Ok(RunStatus::Unbounded),
            "error" => Ok(RunStatus::Error),
            "unknown" => Ok(RunStatus::Unknown),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: i64,
    pub model_id: i64,
    pub data_file_id: Option<i64>,
    pub solver_name: String,
    pub solver_options: Map<String, Value>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub objective_value: Option<f64>,
    /// Wall-clock seconds.
    pub solve_time: Option<f64>,
    pub iterations: Option<i64>,
    pub nodes: Option<i64>,
    pub gap: Option<f64>,
    pub solver_output: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub model_id: i64,
    pub data_file_id: Option<i64>,
    pub solver_name: String,
    pub solver_options: Map<String, Value>,
}

/// Listing row for `GET /api/v1/solver/results`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub id: i64,
    pub model_id: i64,
    pub model_name: Option<String>,
    pub data_file_id: Option<i64>,
    pub solver_name: String,
    pub status: RunStatus,
    pub objective_value: Option<f64>,
    pub solve_time: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableResult {
    pub id: i64,
    pub run_id: i64,
    pub variable_name: String,
    pub variable_index: Option<IndexTuple>,
    pub value: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub reduced_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintResult {
    pub id: i64,
    pub run_id: i64,
    pub constraint_name: String,
    pub constraint_index: Option<IndexTuple>,
    pub body: Option<f64>,
    pub dual: Option<f64>,
    pub slack: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
}

/// A run together with its variable and constraint rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub variables: Vec<VariableResult>,
    pub constraints: Vec<ConstraintResult>,
}
