//! Home-automation controller gateway.
//!
//! Bridges a controller to REST, pub/sub and web-socket clients.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                      GATEWAY                         │
//!   REST client ───────┼─▶ http (mux) ──▶ /veap ──▶ model ◀── collections     │
//!                      │       │                     │            ▲           │
//!   Web-socket client ─┼─▶ /ws-mqtt ─┐               ▼            │           │
//!                      │             ▼          model mirror      │           │
//!   Pub/sub client ────┼─▶ broker ◀──────────────────┘        pipeline        │
//!                      │     ▲                                    ▲           │
//!                      │     └──────────── stage 1 ───────────────┤           │
//!                      │                                          │           │
//!   Controller ◀───────┼── controller (init, scripts)             │           │
//!              ────────┼─▶ /RPC3, binary callback ───────────────┘           │
//!                      │                                                      │
//!                      │   config · net/certs · lifecycle · observability    │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use home_gateway::config::Paths;
use home_gateway::lifecycle::{Gateway, TerminationSignal};
use home_gateway::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "home-gateway", version, about)]
struct Cli {
    /// Working directory holding configuration, certificates and the web UI.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Configuration file, if not `gateway.toml` in the working directory.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log = logging::init();

    let mut paths = Paths::new(&cli.dir);
    if let Some(config) = cli.config {
        paths = paths.with_config_file(config);
    }

    // Installed before startup, so a signal during startup is queued.
    let mut signals = match TerminationSignal::install() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "Installing signal handlers failed");
            return ExitCode::FAILURE;
        }
    };
    let termination = async move {
        match signals.recv().await {
            Some(signal) => tracing::info!(signal, "Shutdown signal received"),
            None => std::future::pending().await,
        }
    };

    // `log` outlives the run so the last error still reaches the writer.
    match Gateway::new(paths).with_log_handle(log.clone()).run(termination).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}
