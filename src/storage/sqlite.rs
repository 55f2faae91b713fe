use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde_json::{Map, Value};

use crate::errors::LabError;
use crate::models::model::{validate_model_update, validate_new_data_file, validate_new_model};
use crate::models::{
    AmplModel, ConstraintResult, DataFile, ModelUpdate, NewDataFile, NewModel, NewRun, Run,
    RunDetail, RunStatus, RunSummary, SolveOutcome, SolveStatus, VariableResult,
};
use crate::storage::{ModelStore, RunStore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ampl_models (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  description TEXT NULL,
  model_content TEXT NOT NULL,
  problem_type TEXT NULL,
  tags TEXT NOT NULL DEFAULT '[]',
  is_template INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS data_files (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  model_id INTEGER NOT NULL REFERENCES ampl_models(id) ON DELETE CASCADE,
  name TEXT NOT NULL,
  file_content TEXT NOT NULL,
  file_type TEXT NOT NULL DEFAULT 'dat',
  source_excel_path TEXT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS optimization_runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  model_id INTEGER NOT NULL REFERENCES ampl_models(id) ON DELETE CASCADE,
  data_file_id INTEGER NULL REFERENCES data_files(id) ON DELETE SET NULL,
  solver_name TEXT NOT NULL,
  solver_options TEXT NOT NULL DEFAULT '{}',
  status TEXT NOT NULL,
  error_message TEXT NULL,
  objective_value REAL NULL,
  solve_time REAL NULL,
  iterations INTEGER NULL,
  nodes INTEGER NULL,
  gap REAL NULL,
  solver_output TEXT NULL,
  started_at TEXT NULL,
  completed_at TEXT NULL,
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS variable_results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES optimization_runs(id) ON DELETE CASCADE,
  variable_name TEXT NOT NULL,
  variable_index TEXT NULL,
  value REAL NULL,
  lower_bound REAL NULL,
  upper_bound REAL NULL,
  reduced_cost REAL NULL
);
CREATE TABLE IF NOT EXISTS constraint_results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES optimization_runs(id) ON DELETE CASCADE,
  constraint_name TEXT NOT NULL,
  constraint_index TEXT NULL,
  body REAL NULL,
  dual REAL NULL,
  slack REAL NULL,
  lower_bound REAL NULL,
  upper_bound REAL NULL
);
CREATE INDEX IF NOT EXISTS idx_data_files_model ON data_files(model_id);
CREATE INDEX IF NOT EXISTS idx_runs_model_created ON optimization_runs(model_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_variable_results_run ON variable_results(run_id);
CREATE INDEX IF NOT EXISTS idx_constraint_results_run ON constraint_results(run_id);
"#;

const MODEL_COLUMNS: &str =
    "id, name, description, model_content, problem_type, tags, is_template, created_at, updated_at";
const DATA_FILE_COLUMNS: &str =
    "id, model_id, name, file_content, file_type, source_excel_path, created_at, updated_at";
const RUN_COLUMNS: &str = "id, model_id, data_file_id, solver_name, solver_options, status, \
     error_message, objective_value, solve_time, iterations, nodes, gap, solver_output, \
     started_at, completed_at, created_at";

/// SQLite-backed model and run store.
///
/// Every operation opens its own connection on a blocking thread, so
/// concurrent solve tasks never share a session.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and ensure the schema.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            db_path: db_path.into(),
        };
        if let Some(parent) = store.db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }
        store
            .with_conn(|conn| {
                conn.execute_batch(SCHEMA)
                    .context("Failed to initialize database schema")?;
                Ok(())
            })
            .await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Self::open_connection(&path)?;
            f(&mut conn)
        })
        .await
        .context("Storage task failed")?
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn ts_text(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn status_col(row: &Row, idx: usize) -> rusqlite::Result<RunStatus> {
    let raw: String = row.get(idx)?;
    raw.parse::<RunStatus>().map_err(|e| conversion_error(idx, e))
}

fn index_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Vec<Value>>> {
    Ok(match row.get::<_, Option<Value>>(idx)? {
        Some(Value::Array(items)) => Some(items),
        _ => None,
    })
}

fn map_model(row: &Row) -> rusqlite::Result<AmplModel> {
    let tags: Value = row.get(5)?;
    Ok(AmplModel {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        model_content: row.get(3)?,
        problem_type: row.get(4)?,
        tags: serde_json::from_value(tags).map_err(|e| conversion_error(5, e))?,
        is_template: row.get(6)?,
        created_at: ts(row, 7)?,
        updated_at: ts(row, 8)?,
    })
}

fn map_data_file(row: &Row) -> rusqlite::Result<DataFile> {
    Ok(DataFile {
        id: row.get(0)?,
        model_id: row.get(1)?,
        name: row.get(2)?,
        file_content: row.get(3)?,
        file_type: row.get(4)?,
        source_excel_path: row.get(5)?,
        created_at: ts(row, 6)?,
        updated_at: ts(row, 7)?,
    })
}

fn map_run(row: &Row) -> rusqlite::Result<Run> {
    let options = match row.get::<_, Value>(4)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(Run {
        id: row.get(0)?,
        model_id: row.get(1)?,
        data_file_id: row.get(2)?,
        solver_name: row.get(3)?,
        solver_options: options,
        status: status_col(row, 5)?,
        error_message: row.get(6)?,
        objective_value: row.get(7)?,
        solve_time: row.get(8)?,
        iterations: row.get(9)?,
        nodes: row.get(10)?,
        gap: row.get(11)?,
        solver_output: row.get(12)?,
        started_at: opt_ts(row, 13)?,
        completed_at: opt_ts(row, 14)?,
        created_at: ts(row, 15)?,
    })
}

fn map_summary(row: &Row) -> rusqlite::Result<RunSummary> {
    Ok(RunSummary {
        id: row.get(0)?,
        model_id: row.get(1)?,
        model_name: row.get(2)?,
        data_file_id: row.get(3)?,
        solver_name: row.get(4)?,
        status: status_col(row, 5)?,
        objective_value: row.get(6)?,
        solve_time: row.get(7)?,
        error_message: row.get(8)?,
        created_at: ts(row, 9)?,
        completed_at: opt_ts(row, 10)?,
    })
}

fn map_variable(row: &Row) -> rusqlite::Result<VariableResult> {
    Ok(VariableResult {
        id: row.get(0)?,
        run_id: row.get(1)?,
        variable_name: row.get(2)?,
        variable_index: index_col(row, 3)?,
        value: row.get(4)?,
        lower_bound: row.get(5)?,
        upper_bound: row.get(6)?,
        reduced_cost: row.get(7)?,
    })
}

fn map_constraint(row: &Row) -> rusqlite::Result<ConstraintResult> {
    Ok(ConstraintResult {
        id: row.get(0)?,
        run_id: row.get(1)?,
        constraint_name: row.get(2)?,
        constraint_index: index_col(row, 3)?,
        body: row.get(4)?,
        dual: row.get(5)?,
        slack: row.get(6)?,
        lower_bound: row.get(7)?,
        upper_bound: row.get(8)?,
    })
}

fn select_model(conn: &Connection, id: i64) -> Result<Option<AmplModel>> {
    let sql = format!("SELECT {} FROM ampl_models WHERE id = ?1", MODEL_COLUMNS);
    Ok(conn.query_row(&sql, params![id], map_model).optional()?)
}

fn select_data_file(conn: &Connection, id: i64) -> Result<Option<DataFile>> {
    let sql = format!("SELECT {} FROM data_files WHERE id = ?1", DATA_FILE_COLUMNS);
    Ok(conn.query_row(&sql, params![id], map_data_file).optional()?)
}

fn select_run(conn: &Connection, id: i64) -> Result<Option<Run>> {
    let sql = format!("SELECT {} FROM optimization_runs WHERE id = ?1", RUN_COLUMNS);
    Ok(conn.query_row(&sql, params![id], map_run).optional()?)
}

fn require_run(conn: &Connection, id: i64) -> Result<Run> {
    select_run(conn, id)?.ok_or_else(|| LabError::NotFound(format!("Run {} not found", id)).into())
}

/// Explain why a guarded status write touched no rows.
fn rejected_transition(conn: &Connection, id: i64, target: &str) -> anyhow::Error {
    match select_run(conn, id) {
        Ok(Some(run)) => LabError::Conflict(format!(
            "Run {} is already {} and cannot become {}",
            id, run.status, target
        ))
        .into(),
        Ok(None) => LabError::NotFound(format!("Run {} not found", id)).into(),
        Err(e) => e,
    }
}

fn insert_result_rows(tx: &Transaction, run_id: i64, outcome: &SolveOutcome) -> Result<()> {
    let mut var_stmt = tx.prepare(
        "INSERT INTO variable_results
           (run_id, variable_name, variable_index, value, lower_bound, upper_bound, reduced_cost)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (name, instances) in &outcome.variables {
        for v in instances {
            let index = v.index.clone().map(Value::Array);
            var_stmt.execute(params![
                run_id,
                name,
                index,
                v.value,
                v.lower_bound,
                v.upper_bound,
                v.reduced_cost
            ])?;
        }
    }

    let mut con_stmt = tx.prepare(
        "INSERT INTO constraint_results
           (run_id, constraint_name, constraint_index, body, dual, slack, lower_bound, upper_bound)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for (name, instances) in &outcome.constraints {
        for c in instances {
            let index = c.index.clone().map(Value::Array);
            con_stmt.execute(params![
                run_id,
                name,
                index,
                c.body,
                c.dual,
                c.slack,
                c.lower_bound,
                c.upper_bound
            ])?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ModelStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ModelStore for SqliteStore {
    async fn list_models(
        &self,
        skip: usize,
        limit: usize,
        problem_type: Option<String>,
    ) -> Result<Vec<AmplModel>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM ampl_models
                 WHERE (?1 IS NULL OR problem_type = ?1)
                 ORDER BY id LIMIT ?2 OFFSET ?3",
                MODEL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let models = stmt
                .query_map(params![problem_type, limit as i64, skip as i64], map_model)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(models)
        })
        .await
    }

    async fn get_model(&self, id: i64) -> Result<Option<AmplModel>> {
        self.with_conn(move |conn| select_model(conn, id)).await
    }

    async fn create_model(&self, new: NewModel) -> Result<AmplModel> {
        validate_new_model(&new)?;
        self.with_conn(move |conn| {
            let now = ts_text(&Utc::now());
            conn.execute(
                "INSERT INTO ampl_models
                   (name, description, model_content, problem_type, tags, is_template, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    new.name,
                    new.description,
                    new.model_content,
                    new.problem_type,
                    Value::from(new.tags),
                    new.is_template,
                    now
                ],
            )
            .context("Failed to insert model")?;
            let id = conn.last_insert_rowid();
            select_model(conn, id)?
                .ok_or_else(|| LabError::Internal(format!("Model {} vanished after insert", id)).into())
        })
        .await
    }

    async fn update_model(&self, id: i64, update: ModelUpdate) -> Result<AmplModel> {
        validate_model_update(&update)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut model = select_model(&tx, id)?
                .ok_or_else(|| LabError::NotFound(format!("Model {} not found", id)))?;

            if let Some(name) = update.name {
                model.name = name;
            }
            if let Some(description) = update.description {
                model.description = Some(description);
            }
            if let Some(content) = update.model_content {
                model.model_content = content;
            }
            if let Some(problem_type) = update.problem_type {
                model.problem_type = Some(problem_type);
            }
            if let Some(tags) = update.tags {
                model.tags = tags;
            }
            model.updated_at = Utc::now();

            tx.execute(
                "UPDATE ampl_models
                 SET name = ?2, description = ?3, model_content = ?4, problem_type = ?5,
                     tags = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    id,
                    model.name,
                    model.description,
                    model.model_content,
                    model.problem_type,
                    Value::from(model.tags.clone()),
                    ts_text(&model.updated_at)
                ],
            )?;
            tx.commit()?;
            Ok(model)
        })
        .await
    }

    async fn delete_model(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM ampl_models WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(LabError::NotFound(format!("Model {} not found", id)).into());
            }
            Ok(())
        })
        .await
    }

    async fn list_data_files(&self, model_id: i64) -> Result<Vec<DataFile>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM data_files WHERE model_id = ?1 ORDER BY id",
                DATA_FILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let files = stmt
                .query_map(params![model_id], map_data_file)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(files)
        })
        .await
    }

    async fn get_data_file(&self, id: i64) -> Result<Option<DataFile>> {
        self.with_conn(move |conn| select_data_file(conn, id)).await
    }

    async fn create_data_file(&self, model_id: i64, new: NewDataFile) -> Result<DataFile> {
        validate_new_data_file(&new)?;
        self.with_conn(move |conn| {
            if select_model(conn, model_id)?.is_none() {
                return Err(LabError::NotFound(format!("Model {} not found", model_id)).into());
            }
            let now = ts_text(&Utc::now());
            conn.execute(
                "INSERT INTO data_files (model_id, name, file_content, file_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![model_id, new.name, new.file_content, new.file_type, now],
            )
            .context("Failed to insert data file")?;
            let id = conn.last_insert_rowid();
            select_data_file(conn, id)?.ok_or_else(|| {
                LabError::Internal(format!("Data file {} vanished after insert", id)).into()
            })
        })
        .await
    }

    async fn delete_data_file(&self, model_id: i64, file_id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM data_files WHERE id = ?1 AND model_id = ?2",
                params![file_id, model_id],
            )?;
            if deleted == 0 {
                return Err(LabError::NotFound(format!("Data file {} not found", file_id)).into());
            }
            Ok(())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

#[async_trait]
impl RunStore for SqliteStore {
    async fn create_run(&self, new: NewRun) -> Result<Run> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO optimization_runs
                   (model_id, data_file_id, solver_name, solver_options, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.model_id,
                    new.data_file_id,
                    new.solver_name,
                    Value::Object(new.solver_options),
                    RunStatus::Queued.as_str(),
                    ts_text(&Utc::now())
                ],
            )
            .context("Failed to insert run")?;
            require_run(conn, conn.last_insert_rowid())
        })
        .await
    }

    async fn get_run(&self, id: i64) -> Result<Option<Run>> {
        self.with_conn(move |conn| select_run(conn, id)).await
    }

    async fn mark_running(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE optimization_runs SET status = 'running', started_at = ?2
                 WHERE id = ?1 AND status = 'queued'",
                params![id, ts_text(&Utc::now())],
            )?;
            if updated == 0 {
                return Err(rejected_transition(conn, id, "running"));
            }
            Ok(())
        })
        .await
    }

    async fn complete_run(&self, id: i64, outcome: &SolveOutcome) -> Result<Run> {
        let outcome = outcome.clone();
        self.with_conn(move |conn| {
            let status = RunStatus::from(outcome.status);
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE optimization_runs
                 SET status = ?2, error_message = ?3, objective_value = ?4, solve_time = ?5,
                     iterations = ?6, nodes = ?7, gap = ?8, solver_output = ?9, completed_at = ?10
                 WHERE id = ?1 AND status IN ('queued', 'running')",
                params![
                    id,
                    status.as_str(),
                    outcome.error_message,
                    outcome.objective_value,
                    outcome.solve_time,
                    outcome.iterations,
                    outcome.nodes,
                    outcome.gap,
                    outcome.solver_output,
                    ts_text(&Utc::now())
                ],
            )?;
            if updated == 0 {
                return Err(rejected_transition(&tx, id, status.as_str()));
            }
            if outcome.status != SolveStatus::Error {
                insert_result_rows(&tx, id, &outcome).context("Failed to insert result rows")?;
            }
            tx.commit().context("Failed to commit run outcome")?;
            require_run(conn, id)
        })
        .await
    }

    async fn fail_run(&self, id: i64, message: &str, solver_output: Option<&str>) -> Result<Run> {
        let message = message.to_string();
        let solver_output = solver_output.map(str::to_string);
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE optimization_runs
                 SET status = 'error', error_message = ?2,
                     solver_output = COALESCE(?3, solver_output), completed_at = ?4
                 WHERE id = ?1 AND status IN ('queued', 'running')",
                params![id, message, solver_output, ts_text(&Utc::now())],
            )?;
            if updated == 0 {
                return Err(rejected_transition(conn, id, "error"));
            }
            require_run(conn, id)
        })
        .await
    }

    async fn list_runs(
        &self,
        model_id: Option<i64>,
        skip: usize,
        limit: usize,
    ) -> Result<(Vec<RunSummary>, usize)> {
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM optimization_runs WHERE (?1 IS NULL OR model_id = ?1)",
                params![model_id],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(
                "SELECT r.id, r.model_id, m.name, r.data_file_id, r.solver_name, r.status,
                        r.objective_value, r.solve_time, r.error_message, r.created_at, r.completed_at
                 FROM optimization_runs r
                 LEFT JOIN ampl_models m ON m.id = r.model_id
                 WHERE (?1 IS NULL OR r.model_id = ?1)
                 ORDER BY r.created_at DESC, r.id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let items = stmt
                .query_map(params![model_id, limit as i64, skip as i64], map_summary)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((items, total as usize))
        })
        .await
    }

    async fn get_run_detail(&self, id: i64) -> Result<Option<RunDetail>> {
        self.with_conn(move |conn| {
            let Some(run) = select_run(conn, id)? else {
                return Ok(None);
            };
            let mut stmt = conn.prepare(
                "SELECT id, run_id, variable_name, variable_index, value, lower_bound, upper_bound,
                        reduced_cost
                 FROM variable_results WHERE run_id = ?1 ORDER BY id",
            )?;
            let variables = stmt
                .query_map(params![id], map_variable)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut stmt = conn.prepare(
                "SELECT id, run_id, constraint_name, constraint_index, body, dual, slack,
                        lower_bound, upper_bound
                 FROM constraint_results WHERE run_id = ?1 ORDER BY id",
            )?;
            let constraints = stmt
                .query_map(params![id], map_constraint)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(RunDetail {
                run,
                variables,
                constraints,
            }))
        })
        .await
    }

    async fn delete_run(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM optimization_runs WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(LabError::NotFound(format!("Run {} not found", id)).into());
            }
            Ok(())
        })
        .await
    }
}
