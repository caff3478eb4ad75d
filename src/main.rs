//! inspector-proxy CLI entry point
//!
//! Launches the debug target under its runtime, discovers the inspector
//! endpoint, and serves a WebSocket relay that any number of debugging
//! clients can attach to.

use std::path::PathBuf;

use clap::Parser;
use inspector_proxy::common::{config::Config, logging};
use inspector_proxy::proxy::Proxy;

#[derive(Parser)]
#[command(name = "inspector-proxy", about = "Supervising WebSocket proxy for inspector debug sessions")]
#[command(version, long_about = None)]
struct Cli {
    /// Script to run under the debuggable runtime
    script: PathBuf,

    /// Arguments passed through to the script
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Port the proxy listens on for clients
    #[arg(long)]
    port: Option<u16>,

    /// Diagnostic port handed to the runtime's inspector flag
    #[arg(long)]
    inspect_port: Option<u16>,

    /// Runtime executable (overrides the configured runtime)
    #[arg(long)]
    runtime: Option<String>,

    /// Respawn the target when its debug connection closes
    #[arg(long)]
    restart_on_close: bool,

    /// Path to a config file (defaults to the per-user location)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> inspector_proxy::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.proxy.listen_port = port;
    }
    if let Some(port) = cli.inspect_port {
        config.target.inspect_port = port;
    }
    if let Some(runtime) = cli.runtime {
        config.target.runtime = runtime;
    }
    if cli.restart_on_close {
        config.proxy.restart_on_close = true;
    }

    let proxy = Proxy::new(config, cli.script, cli.args)?;
    proxy.run().await
}
