use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::engine::{solver_catalogue, ProgressFn, SolveEngine};
use crate::errors::LabError;
use crate::models::solve::is_identifier;
use crate::models::{
    ConstraintValue, EntityName, IndexTuple, ModelInfo, ModelValidation, SetInfo, SolveInput,
    SolveOutcome, SolveStatus, SolverInfo, VariableValue,
};

/// Extra time the child process gets beyond the solver's own time limit.
const GRACE_SECS: u64 = 30;

/// Time limit for loading a model to validate or inspect it.
const INSPECT_TIMEOUT_SECS: u64 = 30;

const MISSING_AMPL: &str = "AMPL executable not found; set ampl_path in the configuration";

#[cfg(windows)]
const AMPL_EXECUTABLE: &str = "ampl.exe";
#[cfg(not(windows))]
const AMPL_EXECUTABLE: &str = "ampl";

const MODEL_FILE: &str = "model.mod";
const DATA_FILE: &str = "data.dat";
const SCRIPT_FILE: &str = "run.ampl";

/// Runs solves through the `ampl` command-line executable.
///
/// Each solve gets its own temporary directory holding the model, the data
/// and a generated run script. The script prints tab-separated result lines
/// which are parsed back into a SolveOutcome.
pub struct AmplCommandEngine {
    ampl_path: Option<PathBuf>,
}

impl AmplCommandEngine {
    /// `ampl_path` may point at the executable or at the directory holding it.
    /// When unset, `PATH` is searched.
    pub fn new(ampl_path: Option<PathBuf>) -> Self {
        Self { ampl_path }
    }

    pub fn resolve_executable(&self) -> Option<PathBuf> {
        match self.ampl_path {
            Some(ref path) if path.is_dir() => {
                let candidate = path.join(AMPL_EXECUTABLE);
                candidate.is_file().then_some(candidate)
            }
            Some(ref path) => path.is_file().then(|| path.clone()),
            None => find_on_path(AMPL_EXECUTABLE),
        }
    }

    fn require_executable(&self) -> Result<PathBuf, LabError> {
        self.resolve_executable()
            .ok_or_else(|| LabError::Engine(MISSING_AMPL.to_string()))
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn report(on_progress: &Option<ProgressFn>, status: &str, message: String) {
    if let Some(ref callback) = on_progress {
        callback(json!({ "status": status, "message": message }));
    }
}

#[async_trait]
impl SolveEngine for AmplCommandEngine {
    async fn solve(
        &self,
        input: SolveInput,
        on_progress: Option<ProgressFn>,
    ) -> anyhow::Result<SolveOutcome> {
        if !is_identifier(&input.solver) {
            return Ok(SolveOutcome::failure(format!(
                "Invalid solver name '{}'",
                input.solver
            )));
        }
        let executable = match self.resolve_executable() {
            Some(path) => path,
            None => return Ok(SolveOutcome::failure(MISSING_AMPL)),
        };

        let workspace = tempfile::tempdir().context("Failed to create solve workspace")?;
        let dir = workspace.path();

        report(&on_progress, "loading_model", "Loading AMPL model...".to_string());
        tokio::fs::write(dir.join(MODEL_FILE), &input.model_content)
            .await
            .context("Failed to write model file")?;

        let data_file = match input.data_content {
            Some(ref data) if !data.is_empty() => {
                report(&on_progress, "loading_data", "Loading data file...".to_string());
                tokio::fs::write(dir.join(DATA_FILE), data)
                    .await
                    .context("Failed to write data file")?;
                Some(DATA_FILE)
            }
            _ => None,
        };

        let script_path = write_script(dir, build_script(&input, MODEL_FILE, data_file)).await?;

        report(
            &on_progress,
            "solving",
            format!("Solving with {}...", input.solver),
        );
        let started = Instant::now();
        let outcome = run_ampl(&executable, &script_path, dir, input.timeout_secs).await;
        let elapsed = started.elapsed().as_secs_f64();

        Ok(match outcome {
            Ok(mut outcome) => {
                outcome.solve_time = Some(elapsed);
                outcome
            }
            Err(message) => SolveOutcome::failure(message),
        })
    }

    async fn available_solvers(&self) -> Vec<SolverInfo> {
        solver_catalogue(self.resolve_executable().is_some())
    }

    async fn validate_model(&self, model_content: &str) -> anyhow::Result<ModelValidation> {
        let executable = self.require_executable()?;
        let workspace = tempfile::tempdir().context("Failed to create inspection workspace")?;
        let dir = workspace.path();

        tokio::fs::write(dir.join(MODEL_FILE), model_content)
            .await
            .context("Failed to write model file")?;
        let script_path = write_script(dir, build_info_script(MODEL_FILE, None, false)).await?;

        let validation =
            match run_script(&executable, &script_path, dir, INSPECT_TIMEOUT_SECS).await {
                Ok(output) if output.stderr.trim().is_empty() => ModelValidation::ok(),
                Ok(output) => ModelValidation::invalid(vec![output.stderr.trim().to_string()]),
                Err(detail) => ModelValidation::invalid(vec![detail]),
            };
        Ok(validation)
    }

    async fn model_info(
        &self,
        model_content: &str,
        data_content: Option<&str>,
    ) -> anyhow::Result<ModelInfo> {
        let executable = self.require_executable()?;
        let workspace = tempfile::tempdir().context("Failed to create inspection workspace")?;
        let dir = workspace.path();

        tokio::fs::write(dir.join(MODEL_FILE), model_content)
            .await
            .context("Failed to write model file")?;
        let data_file = match data_content {
            Some(data) if !data.is_empty() => {
                tokio::fs::write(dir.join(DATA_FILE), data)
                    .await
                    .context("Failed to write data file")?;
                Some(DATA_FILE)
            }
            _ => None,
        };

        let script_path = write_script(dir, build_info_script(MODEL_FILE, data_file, true)).await?;
        let output = run_script(&executable, &script_path, dir, INSPECT_TIMEOUT_SECS)
            .await
            .map_err(|detail| LabError::Engine(format!("Failed to load model: {}", detail)))?;
        let mut info = parse_info_output(&output.stdout);

        // card() fails on indexed sets, which aborts the whole size script;
        // sizes then stay unknown.
        if let Some(data) = data_file {
            if let Some(script) = build_size_script(&info, MODEL_FILE, data) {
                let script_path = write_script(dir, script).await?;
                match run_script(&executable, &script_path, dir, INSPECT_TIMEOUT_SECS).await {
                    Ok(output) => apply_set_sizes(&mut info, &output.stdout),
                    Err(detail) => tracing::debug!("Set sizes unavailable: {}", detail),
                }
            }
        }

        Ok(info)
    }
}

async fn write_script(dir: &Path, script: String) -> anyhow::Result<PathBuf> {
    let script_path = dir.join(SCRIPT_FILE);
    tokio::fs::write(&script_path, script)
        .await
        .context("Failed to write run script")?;
    Ok(script_path)
}

const ENTITY_KINDS: &[(&str, &str)] = &[
    ("SET", "_SETS"),
    ("PARAM", "_PARS"),
    ("VAR", "_VARS"),
    ("OBJ", "_OBJS"),
    ("CON", "_CONS"),
];

/// Script that loads the model (and data) and, when `list` is set, prints
/// one `KIND<TAB>name` line per declared entity.
pub fn build_info_script(model_file: &str, data_file: Option<&str>, list: bool) -> String {
    let mut script = format!("model \"{}\";\n", model_file);
    if let Some(data) = data_file {
        script.push_str(&format!("data \"{}\";\n", data));
    }
    if list {
        for (kind, names) in ENTITY_KINDS {
            script.push_str(&format!(
                "for {{n in {}}} printf \"{}\\t%s\\n\", n;\n",
                names, kind
            ));
        }
    }
    script
}

/// Script printing `SIZE<TAB>name<TAB>count` for every listed set.
/// None when there is nothing to size.
pub fn build_size_script(info: &ModelInfo, model_file: &str, data_file: &str) -> Option<String> {
    let names: Vec<&str> = info
        .sets
        .iter()
        .map(|set| set.name.as_str())
        .filter(|name| is_identifier(name))
        .collect();
    if names.is_empty() {
        return None;
    }

    let mut script = build_info_script(model_file, Some(data_file), false);
    for name in names {
        script.push_str(&format!(
            "printf \"SIZE\\t%s\\t%d\\n\", \"{}\", card({});\n",
            name, name
        ));
    }
    Some(script)
}

pub fn parse_info_output(stdout: &str) -> ModelInfo {
    let mut info = ModelInfo::default();
    for line in stdout.lines() {
        match line.split('\t').collect::<Vec<_>>().as_slice() {
            ["SET", name] => info.sets.push(SetInfo {
                name: name.trim().to_string(),
                size: None,
            }),
            ["PARAM", name] => info.parameters.push(EntityName::new(name.trim())),
            ["VAR", name] => info.variables.push(EntityName::new(name.trim())),
            ["OBJ", name] => info.objectives.push(EntityName::new(name.trim())),
            ["CON", name] => info.constraints.push(EntityName::new(name.trim())),
            _ => {}
        }
    }
    info
}

fn apply_set_sizes(info: &mut ModelInfo, stdout: &str) {
    for line in stdout.lines() {
        if let ["SIZE", name, count] = line.split('\t').collect::<Vec<_>>().as_slice() {
            let size = count.trim().parse::<usize>().ok();
            if let Some(set) = info.sets.iter_mut().find(|set| set.name == *name) {
                set.size = size;
            }
        }
    }
}

/// Captured output of an AMPL run that exited successfully.
struct ScriptOutput {
    stdout: String,
    stderr: String,
}

/// Run a script under `limit_secs` plus the grace period. Start failures,
/// timeouts and non-zero exits come back as a message.
async fn run_script(
    executable: &Path,
    script_path: &Path,
    dir: &Path,
    limit_secs: u64,
) -> Result<ScriptOutput, String> {
    let child = Command::new(executable)
        .arg(script_path)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to start AMPL ({}): {}", executable.display(), e))?;

    let limit = Duration::from_secs(limit_secs.saturating_add(GRACE_SECS));
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("Failed to collect AMPL output: {}", e)),
        Err(_) => {
            return Err(format!(
                "AMPL exceeded the time limit of {} seconds",
                limit_secs
            ))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let detail = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("AMPL exited with {}", output.status));
        return Err(detail);
    }

    Ok(ScriptOutput { stdout, stderr })
}

/// Run the solve script and parse its output. Expected failures come back as
/// the error message for an `error` outcome.
async fn run_ampl(
    executable: &Path,
    script_path: &Path,
    dir: &Path,
    timeout_secs: u64,
) -> Result<SolveOutcome, String> {
    let output = run_script(executable, script_path, dir, timeout_secs).await?;

    let mut outcome = parse_output(&output.stdout);
    if !output.stderr.trim().is_empty() {
        if !outcome.solver_output.is_empty() {
            outcome.solver_output.push('\n');
        }
        outcome.solver_output.push_str(output.stderr.trim_end());
    }
    Ok(outcome)
}

fn option_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Generate the AMPL run script for one solve.
///
/// Option keys are prefixed with the solver name unless they already start
/// with it. Keys that are not plain identifiers are skipped.
pub fn build_script(input: &SolveInput, model_file: &str, data_file: Option<&str>) -> String {
    let solver = &input.solver;
    let mut script = format!("option solver {};\n", solver);

    for (key, value) in &input.options {
        if !is_identifier(key) {
            tracing::warn!("Skipping solver option with invalid name '{}'", key);
            continue;
        }
        let name = if key.starts_with(solver.as_str()) {
            key.clone()
        } else {
            format!("{}_{}", solver, key)
        };
        let literal = match value {
            Value::Number(n) => n.to_string(),
            other => option_literal(other),
        };
        script.push_str(&format!("option {} {};\n", name, literal));
    }

    script.push_str(&format!(
        "option {}_options 'timelimit={}';\n",
        solver, input.timeout_secs
    ));
    script.push_str(&format!("model \"{}\";\n", model_file));
    if let Some(data) = data_file {
        script.push_str(&format!("data \"{}\";\n", data));
    }
    script.push_str("solve;\n");
    script.push_str("printf \"SOLVE_RESULT\\t%s\\n\", solve_result;\n");
    script.push_str("if _nobjs > 0 then printf \"OBJECTIVE\\t%.17g\\n\", _obj[1];\n");
    script.push_str(
        "for {j in 1.._nvars} printf \"VAR\\t%s\\t%.17g\\t%.17g\\t%.17g\\t%.17g\\n\", \
         _varname[j], _var[j], _var[j].lb, _var[j].ub, _var[j].rc;\n",
    );
    script.push_str(
        "for {i in 1.._ncons} printf \"CON\\t%s\\t%.17g\\t%.17g\\t%.17g\\t%.17g\\t%.17g\\n\", \
         _conname[i], _con[i].body, _con[i].dual, _con[i].slack, _con[i].lb, _con[i].ub;\n",
    );
    script
}

/// Parse a printed number. Infinite and unparsable values map to None.
fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_index_value(raw: &str) -> Value {
    let raw = raw.trim();
    let quoted = raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')));
    if quoted {
        let quote = &raw[..1];
        let inner = &raw[1..raw.len() - 1];
        return Value::String(inner.replace(&quote.repeat(2), quote));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(f) = parse_number(raw) {
        return Value::from(f);
    }
    Value::String(raw.to_string())
}

/// Split an AMPL instance name like `ship['A','B']` into `("ship", ["A", "B"])`.
/// Scalar names have no index.
pub fn split_entity_name(full: &str) -> (String, Option<IndexTuple>) {
    let full = full.trim();
    let Some(open) = full.find('[') else {
        return (full.to_string(), None);
    };
    let name = full[..open].to_string();
    let inner = full[open + 1..].strip_suffix(']').unwrap_or(&full[open + 1..]);

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in inner.chars() {
        match (quote, c) {
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, ',') => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    let index: IndexTuple = parts.iter().map(|p| parse_index_value(p)).collect();
    (name, Some(index))
}

/// Solve statistics found in the solver's result message.
#[derive(Debug, Default, PartialEq)]
struct SolverStats {
    iterations: Option<i64>,
    nodes: Option<i64>,
    gap: Option<f64>,
}

fn add_count(slot: &mut Option<i64>, n: i64) {
    *slot = Some(slot.unwrap_or(0) + n);
}

/// Pick iteration and node counts and the relative MIP gap out of one line
/// of solver output, e.g. `12 dual simplex iterations`, `3 branching nodes`
/// or `absmipgap = 0.5, relmipgap = 0.001`. Counts on several lines add up.
fn scan_solver_stats(line: &str, stats: &mut SolverStats) {
    let tokens: Vec<String> = line
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '(' | ')'))
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    for (i, token) in tokens.iter().enumerate() {
        if let Ok(n) = token.parse::<i64>() {
            for next in tokens.iter().skip(i + 1).take(3) {
                if next.starts_with("iteration") {
                    add_count(&mut stats.iterations, n);
                    break;
                }
                if next == "node" || next == "nodes" {
                    add_count(&mut stats.nodes, n);
                    break;
                }
                if next.parse::<f64>().is_ok() {
                    break;
                }
            }
        } else if let Some(rest) = token.strip_prefix("relmipgap") {
            let raw = match rest.trim_start_matches('=') {
                "" => tokens
                    .iter()
                    .skip(i + 1)
                    .find(|t| t.as_str() != "=")
                    .map(String::as_str)
                    .unwrap_or(""),
                value => value,
            };
            if let Some(gap) = parse_number(raw.trim_start_matches('=')) {
                stats.gap = Some(gap);
            }
        }
    }
}

/// Turn the script's printed output into a SolveOutcome.
///
/// Lines that are not result records are kept as solver output and scanned
/// for solve statistics. Explicit `ITERATIONS`, `NODES` and `GAP` records win
/// over scanned values.
pub fn parse_output(stdout: &str) -> SolveOutcome {
    let mut status = SolveStatus::Unknown;
    let mut objective_value = None;
    let mut variables: BTreeMap<String, Vec<VariableValue>> = BTreeMap::new();
    let mut constraints: BTreeMap<String, Vec<ConstraintValue>> = BTreeMap::new();
    let mut reported = SolverStats::default();
    let mut scanned = SolverStats::default();
    let mut other_lines = Vec::new();

    for line in stdout.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            ["SOLVE_RESULT", raw] => status = SolveStatus::normalize(raw),
            ["OBJECTIVE", value] => objective_value = parse_number(value),
            ["ITERATIONS", value] => reported.iterations = parse_number(value).map(|v| v as i64),
            ["NODES", value] => reported.nodes = parse_number(value).map(|v| v as i64),
            ["GAP", value] => reported.gap = parse_number(value),
            ["VAR", name, value, lb, ub, rc] => {
                let (name, index) = split_entity_name(name);
                variables.entry(name).or_default().push(VariableValue {
                    index,
                    value: parse_number(value),
                    lower_bound: parse_number(lb),
                    upper_bound: parse_number(ub),
                    reduced_cost: parse_number(rc),
                });
            }
            ["CON", name, body, dual, slack, lb, ub] => {
                let (name, index) = split_entity_name(name);
                constraints.entry(name).or_default().push(ConstraintValue {
                    index,
                    body: parse_number(body),
                    dual: parse_number(dual),
                    slack: parse_number(slack),
                    lower_bound: parse_number(lb),
                    upper_bound: parse_number(ub),
                });
            }
            _ => {
                scan_solver_stats(line, &mut scanned);
                other_lines.push(line);
            }
        }
    }

    SolveOutcome {
        objective_value,
        iterations: reported.iterations.or(scanned.iterations),
        nodes: reported.nodes.or(scanned.nodes),
        gap: reported.gap.or(scanned.gap),
        variables,
        constraints,
        solver_output: other_lines.join("\n").trim().to_string(),
        ..SolveOutcome::with_status(status)
    }
}
