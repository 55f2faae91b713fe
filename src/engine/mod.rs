// Solve engine seam: the trait the orchestrator calls, the solver catalogue,
// and a scripted mock used by tests.

pub mod ampl;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::LabError;
use crate::models::{ModelInfo, ModelValidation, SolveInput, SolveOutcome, SolverInfo};

pub use ampl::AmplCommandEngine;

/// Progress callback handed to an engine. Called with free-form JSON payloads.
pub type ProgressFn = Arc<dyn Fn(Value) + Send + Sync>;

/// Narrow interface over an external optimization engine.
///
/// Implementations report expected solver failures as an outcome with
/// status `error`. Returning `Err` is reserved for unexpected failures.
#[async_trait]
pub trait SolveEngine: Send + Sync {
    async fn solve(
        &self,
        input: SolveInput,
        on_progress: Option<ProgressFn>,
    ) -> anyhow::Result<SolveOutcome>;

    async fn available_solvers(&self) -> Vec<SolverInfo>;

    /// Load the model text without solving it. Syntax problems come back as
    /// an invalid result, not as `Err`.
    async fn validate_model(&self, model_content: &str) -> anyhow::Result<ModelValidation>;

    /// Declared entities of the model. Set sizes need `data_content`.
    async fn model_info(
        &self,
        model_content: &str,
        data_content: Option<&str>,
    ) -> anyhow::Result<ModelInfo>;
}

const SOLVERS: &[(&str, &str, &[&str])] = &[
    (
        "highs",
        "HiGHS - High-performance open-source LP/MIP solver",
        &["LP", "MIP"],
    ),
    (
        "cplex",
        "IBM CPLEX - Commercial LP/MIP/QP solver",
        &["LP", "MIP", "QP", "MIQP"],
    ),
    (
        "gurobi",
        "Gurobi - Commercial LP/MIP/QP solver",
        &["LP", "MIP", "QP", "MIQP", "QCP"],
    ),
    (
        "cbc",
        "CBC - Open-source MIP solver from COIN-OR",
        &["LP", "MIP"],
    ),
    ("glpk", "GLPK - GNU Linear Programming Kit", &["LP", "MIP"]),
    ("ipopt", "IPOPT - Interior Point Optimizer for NLP", &["NLP"]),
    (
        "xpress",
        "FICO Xpress - Commercial LP/MIP/QP solver",
        &["LP", "MIP", "QP", "MIQP"],
    ),
];

/// The known solver catalogue, every entry marked with `available`.
pub fn solver_catalogue(available: bool) -> Vec<SolverInfo> {
    SOLVERS
        .iter()
        .map(|(name, description, supports)| SolverInfo {
            name: name.to_string(),
            available,
            description: description.to_string(),
            supports: supports.iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}

// --- Mock implementation for testing ---

/// Configuration for a MockSolveEngine.
#[derive(Clone)]
pub struct MockSolveConfig {
    /// Outcome returned from every solve call
    pub outcome: SolveOutcome,
    /// Payloads passed to the progress callback, in order, before returning
    pub progress: Vec<Value>,
    /// Delay before returning the outcome, in milliseconds
    pub delay_ms: u64,
    /// Raise this error instead of returning an outcome
    pub error: Option<String>,
    /// Panic with this message instead of returning an outcome
    pub panic: Option<String>,
    /// Errors reported by `validate_model`; empty means valid
    pub validation_errors: Vec<String>,
    /// Returned from `model_info`
    pub info: ModelInfo,
}

/// Scripted engine for tests. Records every input it was called with.
pub struct MockSolveEngine {
    config: Mutex<MockSolveConfig>,
    calls: Mutex<Vec<SolveInput>>,
}

impl MockSolveEngine {
    pub fn new(config: MockSolveConfig) -> Self {
        Self {
            config: Mutex::new(config),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Return the given outcome immediately.
    pub fn with_outcome(outcome: SolveOutcome) -> Self {
        Self::new(MockSolveConfig {
            outcome,
            progress: Vec::new(),
            delay_ms: 0,
            error: None,
            panic: None,
            validation_errors: Vec::new(),
            info: ModelInfo::default(),
        })
    }

    /// Emit the progress payloads, wait `delay_ms`, then return the outcome.
    pub fn with_progress(outcome: SolveOutcome, progress: Vec<Value>, delay_ms: u64) -> Self {
        Self::new(MockSolveConfig {
            outcome,
            progress,
            delay_ms,
            error: None,
            panic: None,
            validation_errors: Vec::new(),
            info: ModelInfo::default(),
        })
    }

    /// Raise an unexpected error from `solve`.
    pub fn with_error(error: &str) -> Self {
        Self::new(MockSolveConfig {
            error: Some(error.to_string()),
            ..Self::placeholder()
        })
    }

    /// Panic inside `solve`.
    pub fn with_panic(message: &str) -> Self {
        Self::new(MockSolveConfig {
            panic: Some(message.to_string()),
            ..Self::placeholder()
        })
    }

    fn placeholder() -> MockSolveConfig {
        MockSolveConfig {
            outcome: SolveOutcome::with_status(crate::models::SolveStatus::Unknown),
            progress: Vec::new(),
            delay_ms: 0,
            error: None,
            panic: None,
            validation_errors: Vec::new(),
            info: ModelInfo::default(),
        }
    }

    /// Replace the scripted outcome for subsequent calls.
    pub fn set_outcome(&self, outcome: SolveOutcome) {
        if let Ok(mut config) = self.config.lock() {
            config.outcome = outcome;
        }
    }

    pub fn set_validation_errors(&self, errors: Vec<String>) {
        if let Ok(mut config) = self.config.lock() {
            config.validation_errors = errors;
        }
    }

    pub fn set_model_info(&self, info: ModelInfo) {
        if let Ok(mut config) = self.config.lock() {
            config.info = info;
        }
    }

    fn snapshot(&self) -> anyhow::Result<MockSolveConfig> {
        self.config
            .lock()
            .map(|config| config.clone())
            .map_err(|_| anyhow::anyhow!("mock engine config poisoned"))
    }

    /// Inputs received so far.
    pub fn calls(&self) -> Vec<SolveInput> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SolveEngine for MockSolveEngine {
    async fn solve(
        &self,
        input: SolveInput,
        on_progress: Option<ProgressFn>,
    ) -> anyhow::Result<SolveOutcome> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(input);
        }
        let config = self.snapshot()?;

        if let Some(ref callback) = on_progress {
            for payload in &config.progress {
                callback(payload.clone());
            }
        }
        if config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
        }
        if let Some(message) = config.panic {
            panic!("{}", message);
        }
        if let Some(error) = config.error {
            return Err(anyhow::anyhow!(error));
        }
        Ok(config.outcome)
    }

    async fn available_solvers(&self) -> Vec<SolverInfo> {
        solver_catalogue(true)
    }

    async fn validate_model(&self, _model_content: &str) -> anyhow::Result<ModelValidation> {
        let config = self.snapshot()?;
        if let Some(error) = config.error {
            return Err(LabError::Engine(error).into());
        }
        if config.validation_errors.is_empty() {
            Ok(ModelValidation::ok())
        } else {
            Ok(ModelValidation::invalid(config.validation_errors))
        }
    }

    async fn model_info(
        &self,
        _model_content: &str,
        _data_content: Option<&str>,
    ) -> anyhow::Result<ModelInfo> {
        let config = self.snapshot()?;
        if let Some(error) = config.error {
            return Err(LabError::Engine(error).into());
        }
        Ok(config.info)
    }
}
