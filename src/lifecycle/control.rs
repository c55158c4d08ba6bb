//! Top-level control loop.
//!
//! # Responsibilities
//! - Wait for exactly one signal event
//! - Sequence reload (spawn successor, then drain) or terminate (drain/stop)
//! - Publish the control state for observers
//!
//! # Design Decisions
//! - Runs once per generation; later signals are never observed
//! - The successor is spawned before either server drains, so some process
//!   is always accepting on the shared sockets
//! - Accepting is paused before the spawn, so once a reload starts only the
//!   successor accepts new connections; a failed spawn resumes accepting
//! - A failed reload leaves both servers serving; the caller applies the
//!   configured failure policy

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::lifecycle::reload::{ReloadError, Reloader, Successor};
use crate::lifecycle::shutdown::{DrainOutcome, ServerHandle};
use crate::lifecycle::signals::SignalEvent;

/// Where the control loop is in its single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Waiting,
    ReloadInProgress,
    Terminating,
    Stopped,
}

/// How a completed control loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// A successor took over and both servers drained.
    Reloaded {
        successor: Successor,
        http: DrainOutcome,
        rpc: DrainOutcome,
    },
    /// HTTP drained, RPC stopped, no successor.
    Terminated { http: DrainOutcome },
}

pub struct ControlLoop<R> {
    http: ServerHandle,
    rpc: ServerHandle,
    reloader: R,
    events: mpsc::Receiver<SignalEvent>,
    drain_timeout: Duration,
    state: watch::Sender<ControlState>,
}

impl<R: Reloader> ControlLoop<R> {
    pub fn new(
        http: ServerHandle,
        rpc: ServerHandle,
        reloader: R,
        events: mpsc::Receiver<SignalEvent>,
        drain_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ControlState::Waiting);
        Self {
            http,
            rpc,
            reloader,
            events,
            drain_timeout,
            state,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ControlState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ControlState) {
        let previous = self.state.send_replace(next);
        tracing::info!(from = ?previous, to = ?next, "Control state changed");
    }

    /// Handle one event and return.
    ///
    /// A closed event channel is treated as a terminate request.
    pub async fn run(mut self) -> Result<ControlOutcome, ReloadError> {
        tracing::info!(
            drain_timeout_secs = self.drain_timeout.as_secs_f64(),
            "Waiting for signal"
        );

        let event = match self.events.recv().await {
            Some(event) => event,
            None => {
                tracing::warn!("Signal channel closed, terminating");
                SignalEvent::Terminate
            }
        };

        match event {
            SignalEvent::Reload => self.reload().await,
            SignalEvent::Terminate => Ok(self.terminate().await),
        }
    }

    async fn reload(&self) -> Result<ControlOutcome, ReloadError> {
        self.transition(ControlState::ReloadInProgress);

        let paused = tokio::join!(self.http.pause_accepting(), self.rpc.pause_accepting());

        let listeners = [self.http.listener().clone(), self.rpc.listener().clone()];
        let successor = match self.reloader.reload(&listeners) {
            Ok(successor) => successor,
            Err(e) => {
                drop(paused);
                self.transition(ControlState::Waiting);
                return Err(e);
            }
        };

        tracing::info!(successor_pid = successor.pid, "Successor running, draining both servers");
        let (http, rpc) = tokio::join!(
            self.http.drain(self.drain_timeout),
            self.rpc.drain(self.drain_timeout)
        );
        drop(paused);

        self.transition(ControlState::Stopped);
        Ok(ControlOutcome::Reloaded { successor, http, rpc })
    }

    async fn terminate(&self) -> ControlOutcome {
        self.transition(ControlState::Terminating);

        self.rpc.stop();
        let http = self.http.drain(self.drain_timeout).await;

        self.transition(ControlState::Stopped);
        ControlOutcome::Terminated { http }
    }
}
