//! Startup orchestration.
//!
//! # Responsibilities
//! - Build both protocol servers on acquired listeners
//! - Spawn their serving tasks concurrently
//! - Own the handles the control loop and reload path need
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, and happens before this point
//! - No process-wide globals; everything lives in [`ServerContext`]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::GracefulConfig;
use crate::http::HttpServer;
use crate::lifecycle::control::ControlLoop;
use crate::lifecycle::reload::Reloader;
use crate::lifecycle::shutdown::ServerHandle;
use crate::lifecycle::signals::SignalEvent;
use crate::net::listener::Listeners;
use crate::rpc::{DemoService, RpcServer};

/// Running servers of one process generation.
pub struct ServerContext {
    http: ServerHandle,
    rpc: ServerHandle,
    http_addr: SocketAddr,
    rpc_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerContext {
    /// Start the demo servers on `listeners`.
    pub fn start(listeners: Listeners, config: &GracefulConfig) -> Self {
        let http = HttpServer::new(listeners.http, config);
        let rpc = RpcServer::new(listeners.rpc, DemoService::new(&config.demo));
        Self::start_servers(http, rpc)
    }

    /// Start already-built servers.
    pub fn start_servers(http: HttpServer, rpc: RpcServer) -> Self {
        let http_handle = http.handle();
        let rpc_handle = rpc.handle();
        let http_addr = http.local_addr();
        let rpc_addr = rpc.local_addr();

        let tasks = vec![
            tokio::spawn(http.serve().in_current_span()),
            tokio::spawn(rpc.serve().in_current_span()),
        ];

        tracing::info!(http = %http_addr, rpc = %rpc_addr, "Servers started");

        Self {
            http: http_handle,
            rpc: rpc_handle,
            http_addr,
            rpc_addr,
            tasks,
        }
    }

    pub fn http(&self) -> &ServerHandle {
        &self.http
    }

    pub fn rpc(&self) -> &ServerHandle {
        &self.rpc
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    /// A control loop driving this generation.
    pub fn control_loop<R: Reloader>(
        &self,
        reloader: R,
        events: mpsc::Receiver<SignalEvent>,
        drain_timeout: Duration,
    ) -> ControlLoop<R> {
        ControlLoop::new(self.http.clone(), self.rpc.clone(), reloader, events, drain_timeout)
    }

    /// Wait for both serving tasks to finish.
    ///
    /// They finish once drain or stop has been requested.
    pub async fn shutdown(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Serving task failed");
            }
        }
        tracing::info!("Servers stopped");
    }
}
