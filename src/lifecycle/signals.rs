//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGUSR1, SIGTERM, SIGINT)
//! - Translate the first signal into a [`SignalEvent`]
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Single-shot: only the first signal is forwarded; the control loop acts
//!   on exactly one event per generation
//! - Handlers stay registered after the first signal, so a second SIGTERM
//!   does not kill a draining process

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGUSR1: hand listeners to a successor and drain.
    Reload,
    /// SIGINT or SIGTERM: drain and exit.
    Terminate,
}

/// Installs the signal handlers for one control-loop generation.
pub struct SignalListener;

impl SignalListener {
    /// Register handlers and spawn the forwarding task.
    ///
    /// The returned channel yields at most one event. Must be called from
    /// within a Tokio runtime.
    pub fn install() -> std::io::Result<mpsc::Receiver<SignalEvent>> {
        let mut reload = signal(SignalKind::user_defined1())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let (event, name) = tokio::select! {
                _ = reload.recv() => (SignalEvent::Reload, "SIGUSR1"),
                _ = interrupt.recv() => (SignalEvent::Terminate, "SIGINT"),
                _ = terminate.recv() => (SignalEvent::Terminate, "SIGTERM"),
            };
            tracing::info!(signal = name, event = ?event, "Signal received");

            if tx.send(event).await.is_err() {
                tracing::debug!("Control loop gone, dropping signal event");
            }
        });

        tracing::debug!("Signal handlers installed");
        Ok(rx)
    }
}
