pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    AmplModel, DataFile, ModelUpdate, NewDataFile, NewModel, NewRun, Run, RunDetail, RunSummary,
    SolveOutcome,
};

pub use sqlite::SqliteStore;

#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn list_models(
        &self,
        skip: usize,
        limit: usize,
        problem_type: Option<String>,
    ) -> Result<Vec<AmplModel>>;
    async fn get_model(&self, id: i64) -> Result<Option<AmplModel>>;
    async fn create_model(&self, new: NewModel) -> Result<AmplModel>;
    async fn update_model(&self, id: i64, update: ModelUpdate) -> Result<AmplModel>;
    /// Removes the model together with its data files, runs and result rows.
    async fn delete_model(&self, id: i64) -> Result<()>;
    async fn list_data_files(&self, model_id: i64) -> Result<Vec<DataFile>>;
    async fn get_data_file(&self, id: i64) -> Result<Option<DataFile>>;
    async fn create_data_file(&self, model_id: i64, new: NewDataFile) -> Result<DataFile>;
    async fn delete_data_file(&self, model_id: i64, file_id: i64) -> Result<()>;
}

/// Durable run records.
///
/// Status moves only `queued -> running -> terminal`. Writes that would move
/// a run backwards or overwrite a terminal status fail with `Conflict`.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, new: NewRun) -> Result<Run>;
    async fn get_run(&self, id: i64) -> Result<Option<Run>>;
    async fn mark_running(&self, id: i64) -> Result<()>;
    /// Write the terminal outcome. Variable and constraint rows are inserted in
    /// the same transaction, except for `error` outcomes which carry none.
    async fn complete_run(&self, id: i64, outcome: &SolveOutcome) -> Result<Run>;
    async fn fail_run(&self, id: i64, message: &str, solver_output: Option<&str>) -> Result<Run>;
    /// Newest first. Returns the page and the total number of matching runs.
    async fn list_runs(
        &self,
        model_id: Option<i64>,
        skip: usize,
        limit: usize,
    ) -> Result<(Vec<RunSummary>, usize)>;
    async fn get_run_detail(&self, id: i64) -> Result<Option<RunDetail>>;
    async fn delete_run(&self, id: i64) -> Result<()>;
}
