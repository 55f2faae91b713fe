use clap::Parser;
use tracing_subscriber::EnvFilter;

use solve_lab::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise --verbose picks debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = cli::dispatch(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
