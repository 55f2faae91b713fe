// Solve service bootstrap: config resolution, background tasks, and the
// HTTP server lifecycle.

pub mod events;
pub mod orchestrator;
pub mod progress;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::daemon::events::SolveEvent;
use crate::daemon::orchestrator::{Orchestrator, SolveDefaults};
use crate::daemon::status::JobStatusTable;
use crate::engine::{AmplCommandEngine, SolveEngine};
use crate::models::LabConfig;
use crate::server::{self, AppState};
use crate::storage::SqliteStore;

const APP_DIR: &str = "solve-lab";
const DATABASE_FILE: &str = "solve-lab.db";

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

fn read_config(path: &Path) -> Result<LabConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: LabConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    tracing::info!("Loaded config from: {}", path.display());
    Ok(config)
}

/// Load the LabConfig. Resolution order:
///   1. `--config` CLI flag (passed as config_path)
///   2. SOLVE_LAB_CONFIG_DIR environment variable
///   3. Platform config dir (dirs::config_dir()/solve-lab/config.json)
///   4. `{data_dir}/config.json`
///   5. LabConfig::default()
pub fn load_config(config_path: Option<&Path>) -> Result<LabConfig> {
    if let Some(path) = config_path {
        if path.exists() {
            return read_config(path);
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    if let Ok(config_dir) = std::env::var("SOLVE_LAB_CONFIG_DIR") {
        let path = PathBuf::from(config_dir).join("config.json");
        if path.exists() {
            return read_config(&path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join(APP_DIR).join("config.json");
        if path.exists() {
            return read_config(&path);
        }
    }

    let path = resolve_data_dir(None).join("config.json");
    if path.exists() {
        return read_config(&path);
    }

    tracing::info!("No config file found, using defaults");
    Ok(LabConfig::default())
}

/// Resolve the data directory: explicit override, then SOLVE_LAB_DATA_DIR,
/// then `dirs::data_dir()/solve-lab`.
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    if let Ok(d) = std::env::var("SOLVE_LAB_DATA_DIR") {
        return PathBuf::from(d);
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// SQLite file location: `database_path` from config, else `<data_dir>/solve-lab.db`.
pub fn resolve_database_path(config: &LabConfig, data_dir: &Path) -> PathBuf {
    config
        .database_path
        .clone()
        .unwrap_or_else(|| data_dir.join(DATABASE_FILE))
}

pub async fn create_data_dirs(data_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;
    tracing::info!("Data directory ensured at: {}", data_dir.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Log job lifecycle lines for every event on the bus.
pub fn spawn_event_logger(mut rx: broadcast::Receiver<SolveEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SolveEvent::Queued {
                    job_id,
                    run_id,
                    model_id,
                    solver,
                    ..
                }) => {
                    tracing::info!(
                        "Job {} queued (run: {}, model: {}, solver: {})",
                        job_id,
                        run_id,
                        model_id,
                        solver
                    );
                }
                Ok(SolveEvent::Started { job_id, run_id, .. }) => {
                    tracing::info!("Job {} started (run: {})", job_id, run_id);
                }
                Ok(SolveEvent::Completed {
                    job_id,
                    run_id,
                    status,
                    objective_value,
                    ..
                }) => {
                    tracing::info!(
                        "Job {} completed (run: {}, status: {}, objective: {:?})",
                        job_id,
                        run_id,
                        status,
                        objective_value
                    );
                }
                Ok(SolveEvent::Failed {
                    job_id,
                    run_id,
                    ref error,
                    ..
                }) => {
                    tracing::warn!("Job {} failed (run: {}): {}", job_id, run_id, error);
                }
                Ok(SolveEvent::Cancelled { job_id, .. }) => {
                    tracing::info!("Job {} cancellation requested", job_id);
                }
                Ok(SolveEvent::Progress { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event logger lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Periodically evict finished status entries older than `ttl`.
///
/// Returns `None` when `ttl` is zero, which keeps entries until restart.
pub fn spawn_status_sweeper(
    statuses: Arc<JobStatusTable>,
    ttl: Duration,
    every: Duration,
) -> Option<JoinHandle<()>> {
    if ttl.is_zero() {
        tracing::info!("Job status eviction disabled");
        return None;
    }
    let every = every.max(Duration::from_millis(10));
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = statuses.evict_finished(ttl);
            if evicted > 0 {
                tracing::debug!("Evicted {} finished job status entries", evicted);
            }
        }
    }))
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Wire stores, engine, orchestrator and router state for a resolved config.
///
/// `config.data_dir` must already be set.
pub async fn build_state(
    config: Arc<LabConfig>,
    engine: Arc<dyn SolveEngine>,
) -> Result<Arc<AppState>> {
    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| resolve_data_dir(None));
    let db_path = resolve_database_path(&config, &data_dir);
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );
    tracing::info!("Using database: {}", store.path().display());

    let (event_tx, _event_rx) = broadcast::channel::<SolveEvent>(config.broadcast_capacity);

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store.clone(),
        engine,
        event_tx.clone(),
        SolveDefaults {
            solver: config.default_solver.clone(),
            timeout_secs: config.default_timeout_secs,
        },
    ));

    Ok(Arc::new(AppState {
        model_store: store.clone(),
        run_store: store,
        orchestrator,
        event_tx,
        config,
        start_time: Instant::now(),
    }))
}

/// Start the solve service and block until Ctrl+C or SIGTERM.
pub async fn start_server(
    config_path: Option<&Path>,
    data_dir_override: Option<&Path>,
    host_override: Option<&str>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = load_config(config_path)?;

    if let Some(h) = host_override {
        config.host = h.to_string();
    }
    if let Some(p) = port_override {
        config.port = p;
    }

    let data_dir = if let Some(d) = data_dir_override {
        d.to_path_buf()
    } else if let Some(ref d) = config.data_dir {
        d.clone()
    } else {
        resolve_data_dir(None)
    };
    config.data_dir = Some(data_dir.clone());
    create_data_dirs(&data_dir).await?;

    let engine = Arc::new(AmplCommandEngine::new(config.ampl_path.clone()));
    match engine.resolve_executable() {
        Some(path) => tracing::info!("AMPL executable: {}", path.display()),
        None => tracing::warn!("AMPL executable not found; solves will report an error"),
    }

    let config = Arc::new(config);
    let state = build_state(Arc::clone(&config), engine).await?;

    let logger_handle = spawn_event_logger(state.event_tx.subscribe());
    let sweeper_handle = spawn_status_sweeper(
        Arc::clone(state.orchestrator.statuses()),
        Duration::from_secs(config.job_status_ttl_secs),
        Duration::from_secs(config.status_sweep_interval_secs),
    );

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(());

    let router = server::create_router(Arc::clone(&state));
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Solve service listening on http://{}", bind_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
                tracing::info!("HTTP server received shutdown signal");
            })
            .await
            .ok();
    });

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C signal");
    }

    let _ = shutdown_tx.send(());

    logger_handle.abort();
    if let Some(handle) = sweeper_handle {
        handle.abort();
    }

    let active = state.orchestrator.statuses().active_count();
    if active > 0 {
        tracing::warn!(
            "Shutting down with {} solve job(s) still in flight",
            active
        );
    }

    let _ = server_handle.await;

    tracing::info!("Solve service exited cleanly.");
    Ok(())
}
