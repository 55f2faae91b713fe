pub mod config;
pub mod job;
pub mod model;
pub mod run;
pub mod solve;

pub use config::LabConfig;
pub use job::{JobState, JobStatusSnapshot, SubmitResponse};
pub use model::{
    AmplModel, DataFile, EntityName, ModelInfo, ModelUpdate, ModelValidation, NewDataFile, NewModel,
    SetInfo,
};
pub use run::{ConstraintResult, NewRun, Run, RunDetail, RunStatus, RunSummary, VariableResult};
pub use solve::{
    ConstraintValue, IndexTuple, SolveInput, SolveOutcome, SolveRequest, SolveStatus, SolverInfo,
    VariableValue,
};
