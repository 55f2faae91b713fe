pub mod serve;
pub mod solve;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

/// Solve Lab - run AMPL optimization models as background jobs
#[derive(Parser, Debug)]
#[command(
    name = "solvelab",
    version,
    about = "Solve Lab - run AMPL optimization models as background jobs"
)]
pub struct Cli {
    /// Service host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// Service port
    #[arg(long, default_value_t = 8000, global = true)]
    pub port: u16,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the solve service in the foreground
    Serve {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },

    /// List the solver catalogue
    Solvers,

    /// Submit a model for solving
    Submit {
        /// Model id
        #[arg(short = 'm', long = "model")]
        model: i64,

        /// Data file id
        #[arg(short = 'd', long = "data")]
        data: Option<i64>,

        /// Solver name (default: the service's configured solver)
        #[arg(short = 's', long)]
        solver: Option<String>,

        /// Timeout in seconds (1-3600)
        #[arg(short = 't', long)]
        timeout: Option<u64>,

        /// Solver options (KEY=VALUE)
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        option: Vec<String>,

        /// Poll until the job finishes
        #[arg(short = 'w', long)]
        wait: bool,
    },

    /// Show the status of a solve job
    Status {
        /// Job token returned by submit
        job_id: String,
    },

    /// Request cancellation of a solve job
    Cancel {
        /// Job token returned by submit
        job_id: String,
    },

    /// List stored solve results, newest first
    Results {
        /// Only results for this model
        #[arg(short = 'm', long = "model")]
        model: Option<i64>,

        /// Results to skip
        #[arg(long, default_value_t = 0)]
        skip: usize,

        /// Maximum results to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored models
    Models {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Build the base URL for the service HTTP API.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

/// Parse solver options from "KEY=VALUE" form.
///
/// Values that read as JSON numbers or booleans keep that type; anything else
/// is passed as a string.
pub fn parse_options(option_args: &[String]) -> Result<Map<String, Value>, String> {
    let mut map = Map::new();
    for arg in option_args {
        let Some((key, raw)) = arg.split_once('=') else {
            return Err(format!(
                "Invalid solver option format: '{}'. Expected KEY=VALUE",
                arg
            ));
        };
        if key.trim().is_empty() {
            return Err(format!("Invalid solver option: '{}'", arg));
        }
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => Value::String(raw.to_string()),
        };
        map.insert(key.trim().to_string(), value);
    }
    Ok(map)
}

/// Format a connection error message for when the service is not reachable.
pub fn connection_error_message(host: &str, port: u16) -> String {
    format!(
        "Could not connect to the solve service at {}:{}. Is it running? (try: solvelab serve)",
        host, port
    )
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Some(Commands::Serve {
            config,
            port,
            data_dir,
        }) => {
            serve::cmd_serve(
                &cli.host,
                cli.port,
                config.as_deref(),
                *port,
                data_dir.as_deref(),
            )
            .await
        }
        Some(Commands::Solvers) => solve::cmd_solvers(&cli.host, cli.port).await,
        Some(Commands::Submit {
            model,
            data,
            solver,
            timeout,
            option,
            wait,
        }) => {
            solve::cmd_submit(
                &cli.host,
                cli.port,
                *model,
                *data,
                solver.as_deref(),
                *timeout,
                option,
                *wait,
            )
            .await
        }
        Some(Commands::Status { job_id }) => solve::cmd_status(&cli.host, cli.port, job_id).await,
        Some(Commands::Cancel { job_id }) => solve::cmd_cancel(&cli.host, cli.port, job_id).await,
        Some(Commands::Results {
            model,
            skip,
            limit,
            json,
        }) => solve::cmd_results(&cli.host, cli.port, *model, *skip, *limit, *json).await,
        Some(Commands::Models { json }) => solve::cmd_models(&cli.host, cli.port, *json).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;

    #[test]
    fn test_cli_version_flag() {
        let err = Cli::try_parse_from(["solvelab", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_cli_default_host_port() {
        let cli = Cli::try_parse_from(["solvelab", "solvers"]).expect("parse");
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 8000);
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Solvers)));
    }

    #[test]
    fn test_cli_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "solvelab", "status", "abc", "--host", "10.0.0.2", "--port", "9001", "-v",
        ])
        .expect("parse");
        assert_eq!(cli.host, "10.0.0.2");
        assert_eq!(cli.port, 9001);
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Status { job_id }) => assert_eq!(job_id, "abc"),
            other => panic!("Expected Status command, got: {:?}", other),
        }
    }

    #[test]
    fn test_cli_submit_parses_correctly() {
        let cli = Cli::try_parse_from([
            "solvelab", "submit", "-m", "3", "-d", "7", "-s", "cbc", "-t", "60", "-o",
            "mipgap=0.01", "-o", "presolve=off", "--wait",
        ])
        .expect("parse submit");

        match cli.command {
            Some(Commands::Submit {
                model,
                data,
                solver,
                timeout,
                option,
                wait,
            }) => {
                assert_eq!(model, 3);
                assert_eq!(data, Some(7));
                assert_eq!(solver.as_deref(), Some("cbc"));
                assert_eq!(timeout, Some(60));
                assert_eq!(option, vec!["mipgap=0.01", "presolve=off"]);
                assert!(wait);
            }
            other => panic!("Expected Submit command, got: {:?}", other),
        }
    }

    #[test]
    fn test_cli_submit_requires_model() {
        assert!(Cli::try_parse_from(["solvelab", "submit"]).is_err());
    }

    #[test]
    fn test_cli_serve_all_flags() {
        let cli = Cli::try_parse_from([
            "solvelab",
            "serve",
            "--config",
            "/etc/solve-lab.json",
            "--port",
            "9100",
            "--data-dir",
            "/var/lib/solve-lab",
        ])
        .expect("parse serve");
        match cli.command {
            Some(Commands::Serve {
                config,
                port,
                data_dir,
            }) => {
                assert_eq!(config.as_deref(), Some("/etc/solve-lab.json"));
                assert_eq!(port, Some(9100));
                assert_eq!(data_dir.as_deref(), Some("/var/lib/solve-lab"));
            }
            other => panic!("Expected Serve command, got: {:?}", other),
        }
    }

    #[test]
    fn test_cli_results_defaults() {
        let cli = Cli::try_parse_from(["solvelab", "results"]).expect("parse");
        match cli.command {
            Some(Commands::Results {
                model,
                skip,
                limit,
                json,
            }) => {
                assert!(model.is_none());
                assert_eq!(skip, 0);
                assert_eq!(limit, 20);
                assert!(!json);
            }
            other => panic!("Expected Results command, got: {:?}", other),
        }
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("127.0.0.1", 8000), "http://127.0.0.1:8000");
    }

    #[test]
    fn test_connection_error_message() {
        let msg = connection_error_message("localhost", 8000);
        assert!(msg.contains("localhost:8000"));
        assert!(msg.contains("solvelab serve"));
    }

    #[test]
    fn test_parse_options_typed_values() {
        let opts = parse_options(&[
            "mipgap=0.01".to_string(),
            "threads=4".to_string(),
            "presolve=off".to_string(),
            "verbose=true".to_string(),
            "expr=a=b".to_string(),
        ])
        .expect("parse");
        assert_eq!(opts["mipgap"], json!(0.01));
        assert_eq!(opts["threads"], json!(4));
        assert_eq!(opts["presolve"], json!("off"));
        assert_eq!(opts["verbose"], json!(true));
        assert_eq!(opts["expr"], json!("a=b"));
    }

    #[test]
    fn test_parse_options_rejects_bad_input() {
        assert!(parse_options(&["novalue".to_string()]).is_err());
        assert!(parse_options(&["=1".to_string()]).is_err());
        assert!(parse_options(&[]).expect("empty").is_empty());
    }
}
