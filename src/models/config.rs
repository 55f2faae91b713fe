use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// SQLite file. Defaults to `<data_dir>/solve-lab.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Path to the `ampl` executable, or the directory holding it.
    #[serde(default)]
    pub ampl_path: Option<PathBuf>,
    #[serde(default = "default_solver")]
    pub default_solver: String,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Finished status entries older than this are evicted. 0 keeps them forever.
    #[serde(default = "default_job_status_ttl_secs")]
    pub job_status_ttl_secs: u64,
    #[serde(default = "default_status_sweep_interval_secs")]
    pub status_sweep_interval_secs: u64,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_solver() -> String {
    "highs".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_broadcast_capacity() -> usize {
    4096
}

fn default_job_status_ttl_secs() -> u64 {
    3600
}

fn default_status_sweep_interval_secs() -> u64 {
    60
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            database_path: None,
            ampl_path: None,
            default_solver: default_solver(),
            default_timeout_secs: default_timeout_secs(),
            broadcast_capacity: default_broadcast_capacity(),
            job_status_ttl_secs: default_job_status_ttl_secs(),
            status_sweep_interval_secs: default_status_sweep_interval_secs(),
            cors_origins: Vec::new(),
        }
    }
}
