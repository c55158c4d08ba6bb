//! graceful-net: HTTP and RPC with zero-downtime restarts.
//!
//! # Architecture Overview
//!
//! ```text
//!   generation N                                   generation N+1
//!  ┌──────────────────────────────────┐           ┌──────────────────────────┐
//!  │ net::acquire (bind or adopt)     │           │ net::acquire (adopt 3,4) │
//!  │        │                         │           │        │                 │
//!  │        ▼                         │  fds 3,4  │        ▼                 │
//!  │ HttpServer ─┐                    │ ────────▶ │ HttpServer, RpcServer    │
//!  │ RpcServer  ─┤◀── ControlLoop ◀── signals     │        ...               │
//!  │             │        │           │           └──────────────────────────┘
//!  │             │        ▼           │
//!  │             │   ReloadCoordinator ── spawn ──▶ (--graceful)
//!  │             ▼                    │
//!  │     drain (bounded) → exit       │
//!  └──────────────────────────────────┘
//! ```
//!
//! `kill -USR1 <pid>` reloads; `kill -TERM <pid>` or Ctrl+C terminates.

use std::path::PathBuf;

use clap::Parser;
use tracing::Instrument;

use graceful_net::config::{self, GracefulConfig, ReloadFailurePolicy};
use graceful_net::lifecycle::{ControlOutcome, ReloadCoordinator, ServerContext, SignalListener};
use graceful_net::net::{self, InheritedListeners, ListenerAddrs};
use graceful_net::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "graceful-net", version)]
#[command(about = "HTTP and RPC server with zero-downtime reload", long_about = None)]
struct Cli {
    /// Adopt listeners inherited from a predecessor instead of binding
    #[arg(long)]
    graceful: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<String>,

    /// Override the RPC listen address
    #[arg(long)]
    rpc_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = config::load_or_default(cli.config.as_deref(), |config| {
        if let Some(address) = &cli.http_addr {
            config.listeners.http_address = address.clone();
        }
        if let Some(address) = &cli.rpc_addr {
            config.listeners.rpc_address = address.clone();
        }
    })?;

    logging::init(&config.observability)?;

    let span = logging::process_span(cli.graceful);
    run(cli.graceful, config).instrument(span).await
}

async fn run(warm: bool, config: GracefulConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), warm, "graceful-net starting");

    // Registered before serving so an early SIGUSR1 cannot kill the process.
    let mut events = Some(SignalListener::install()?);

    let inherited = match InheritedListeners::from_env(warm) {
        Ok(inherited) => inherited,
        Err(e) => {
            tracing::error!(error = %e, "Invalid listener hand-off");
            return Err(e.into());
        }
    };

    let listeners = match net::acquire(&ListenerAddrs::from(&config.listeners), inherited).await {
        Ok(listeners) => listeners,
        Err(e) => {
            tracing::error!(error = %e, "Failed to acquire listeners");
            return Err(e.into());
        }
    };

    let context = ServerContext::start(listeners, &config);
    let coordinator = ReloadCoordinator::new();
    let drain_timeout = config.shutdown.drain_timeout();

    let outcome = loop {
        let events = match events.take() {
            Some(events) => events,
            None => SignalListener::install()?,
        };
        match context.control_loop(coordinator.clone(), events, drain_timeout).run().await {
            Ok(outcome) => break outcome,
            Err(e) => match config.shutdown.on_reload_failure {
                ReloadFailurePolicy::KeepServing => {
                    tracing::error!(error = %e, "Reload failed, still serving");
                }
                ReloadFailurePolicy::Exit => {
                    tracing::error!(error = %e, "Reload failed, exiting");
                    return Err(e.into());
                }
            },
        }
    };

    match outcome {
        ControlOutcome::Reloaded { successor, http, rpc } => {
            tracing::info!(successor_pid = successor.pid, http = ?http, rpc = ?rpc, "Handed off to successor");
        }
        ControlOutcome::Terminated { http } => {
            tracing::info!(http = ?http, "Terminated");
        }
    }

    context.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
