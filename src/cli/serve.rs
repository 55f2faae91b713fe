// CLI serve command: run the solve service in this process

use std::path::Path;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;

/// solvelab serve
///
/// The subcommand's `--port` wins. The global `--host`/`--port` only override
/// the config file when they differ from their defaults.
pub async fn cmd_serve(
    host: &str,
    global_port: u16,
    config: Option<&str>,
    port_override: Option<u16>,
    data_dir: Option<&str>,
) -> anyhow::Result<()> {
    let (host_override, port_override) = serve_overrides(host, global_port, port_override);

    crate::daemon::start_server(
        config.map(Path::new),
        data_dir.map(Path::new),
        host_override,
        port_override,
    )
    .await
}

fn serve_overrides(
    host: &str,
    global_port: u16,
    port_override: Option<u16>,
) -> (Option<&str>, Option<u16>) {
    let host_override = (host != DEFAULT_HOST).then_some(host);
    let port_override = port_override.or((global_port != DEFAULT_PORT).then_some(global_port));
    (host_override, port_override)
}
