//! Shutdown coordination shared by both protocol servers.
//!
//! # Responsibilities
//! - Publish per-server state (Stopped → Serving → Draining)
//! - Tell the accept loop to stop and connections to wind down
//! - Bound the drain by a deadline, then force-close stragglers
//! - Pause accepting while a successor is being launched
//!
//! # Design Decisions
//! - Two tokens: `stop` asks nicely, `force` drops sockets
//! - Draining is terminal; a server never re-enters Serving
//! - Drain never fails; timeouts are logged and counted
//! - Accept errors while serving are retried after a back-off, never fatal
//! - A pause holds the accept gate exclusively; the accept loop only calls
//!   `accept` while holding it shared

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::{watch, OwnedRwLockWriteGuard, RwLock};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::listener::{Listener, ListenerHandle, Protocol};
use crate::observability::metrics;

/// How long force-closed connections get to unwind before drain returns.
pub const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Pause after a failed accept before trying again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Runtime state of one protocol server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Serving,
    Draining,
}

/// Result of a bounded drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every connection finished before the deadline.
    Drained,
    /// The deadline passed; `remaining` connections were force-closed.
    TimedOut { remaining: u64 },
}

/// Coordinator for graceful shutdown of one server.
#[derive(Debug, Clone)]
pub struct Shutdown {
    protocol: Protocol,
    stop: CancellationToken,
    force: CancellationToken,
    listener_closed: CancellationToken,
    tracker: ConnectionTracker,
    state: Arc<watch::Sender<ServerState>>,
    accept_gate: Arc<RwLock<()>>,
    pause_requested: Arc<watch::Sender<bool>>,
}

/// Accepting stays paused while this is held.
#[derive(Debug)]
pub struct AcceptPause {
    protocol: Protocol,
    pause_requested: Arc<watch::Sender<bool>>,
    _gate: OwnedRwLockWriteGuard<()>,
}

impl Drop for AcceptPause {
    fn drop(&mut self) {
        // Cleared before the gate is released so the accept loop does not
        // back straight off again.
        self.pause_requested.send_replace(false);
        tracing::debug!(protocol = %self.protocol, "Accepting resumed");
    }
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new(protocol: Protocol) -> Self {
        let (state, _) = watch::channel(ServerState::Stopped);
        let (pause_requested, _) = watch::channel(false);
        Self {
            protocol,
            stop: CancellationToken::new(),
            force: CancellationToken::new(),
            listener_closed: CancellationToken::new(),
            tracker: ConnectionTracker::new(protocol),
            state: Arc::new(state),
            accept_gate: Arc::new(RwLock::new(())),
            pause_requested: Arc::new(pause_requested),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Cancelled when the server should stop accepting.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Cancelled when connections must be dropped immediately.
    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn accepting_paused(&self) -> bool {
        *self.pause_requested.borrow()
    }

    /// Stop calling `accept` until the returned guard is dropped.
    ///
    /// Resolves once no accept is pending. Connections arriving meanwhile wait
    /// in the kernel backlog. Drain and stop still work while paused.
    pub async fn pause_accepting(&self) -> AcceptPause {
        self.pause_requested.send_replace(true);
        let gate = Arc::clone(&self.accept_gate).write_owned().await;
        tracing::debug!(protocol = %self.protocol, "Accepting paused");
        AcceptPause {
            protocol: self.protocol,
            pause_requested: Arc::clone(&self.pause_requested),
            _gate: gate,
        }
    }

    /// Enter Serving. Returns a guard the accept loop holds until its
    /// listener is dropped, or `None` if drain already started.
    pub fn start_serving(&self) -> Option<DropGuard> {
        let started = self.state.send_if_modified(|state| {
            if *state == ServerState::Stopped {
                *state = ServerState::Serving;
                true
            } else {
                false
            }
        });
        started.then(|| self.listener_closed.clone().drop_guard())
    }

    fn begin_draining(&self) -> bool {
        let previous = self.state.send_replace(ServerState::Draining);
        if previous != ServerState::Draining {
            tracing::info!(protocol = %self.protocol, from = ?previous, "Server draining");
        }
        previous == ServerState::Serving
    }

    /// Stop accepting and wait for in-flight work, at most `deadline`.
    ///
    /// Connections still open at the deadline are dropped. Calling this on a
    /// server that is already draining waits again but does not re-trigger.
    pub async fn drain(&self, deadline: Duration) -> DrainOutcome {
        let started = Instant::now();
        let was_serving = self.begin_draining();
        self.stop.cancel();

        tracing::info!(
            protocol = %self.protocol,
            active_connections = self.tracker.active_count(),
            deadline_secs = deadline.as_secs_f64(),
            "Draining connections"
        );

        let settled = async {
            if was_serving {
                self.listener_closed.cancelled().await;
            }
            self.tracker.wait_idle().await;
        };

        let outcome = tokio::select! {
            _ = settled => {
                tracing::info!(protocol = %self.protocol, "All connections drained cleanly");
                DrainOutcome::Drained
            }
            _ = tokio::time::sleep(deadline) => {
                let remaining = self.tracker.active_count();
                tracing::warn!(
                    protocol = %self.protocol,
                    remaining_connections = remaining,
                    deadline_secs = deadline.as_secs_f64(),
                    "Drain deadline reached, closing remaining connections"
                );
                self.force.cancel();
                if tokio::time::timeout(FORCE_CLOSE_GRACE, self.tracker.wait_idle()).await.is_err() {
                    tracing::warn!(
                        protocol = %self.protocol,
                        remaining_connections = self.tracker.active_count(),
                        "Connections still unwinding after force close"
                    );
                }
                DrainOutcome::TimedOut { remaining }
            }
        };

        metrics::record_drain(
            self.protocol,
            started.elapsed(),
            matches!(outcome, DrainOutcome::TimedOut { .. }),
        );
        outcome
    }

    /// Accept on `listener` until stop is requested, handing each tracked
    /// connection to `on_connection`.
    ///
    /// Returns immediately if drain started before serving. The listener is
    /// dropped before this returns.
    pub async fn accept_until_stopped<F>(&self, listener: Listener, mut on_connection: F)
    where
        F: FnMut(TcpStream, SocketAddr, ConnectionGuard),
    {
        let Some(_closed) = self.start_serving() else {
            tracing::info!(protocol = %self.protocol, "Stopped before serving, closing listener");
            return;
        };

        let address = listener.local_addr();
        tracing::info!(protocol = %self.protocol, address = %address, "Accepting connections");

        let mut paused = self.pause_requested.subscribe();

        loop {
            let _permit = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                permit = Arc::clone(&self.accept_gate).read_owned() => permit,
            };

            let pause_requested = async {
                let _ = paused.wait_for(|paused| *paused).await;
            };
            let accepted = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = pause_requested => continue,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => on_connection(stream, peer, self.tracker.track()),
                Err(e) => {
                    tracing::warn!(protocol = %self.protocol, error = %e, "Accept failed, backing off");
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        drop(listener);
        tracing::info!(protocol = %self.protocol, address = %address, "Listener closed");
    }

    /// Close the listener and every connection without waiting.
    pub fn stop_now(&self) {
        self.begin_draining();
        tracing::info!(
            protocol = %self.protocol,
            active_connections = self.tracker.active_count(),
            "Stopping immediately"
        );
        self.stop.cancel();
        self.force.cancel();
    }
}

/// Control-side view of a running server.
///
/// Cheap to clone. Holds no strong reference to the listener, so the serving
/// task alone decides when the socket closes.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Shutdown,
    listener: ListenerHandle,
}

impl ServerHandle {
    pub fn new(shutdown: Shutdown, listener: ListenerHandle) -> Self {
        Self { shutdown, listener }
    }

    pub fn protocol(&self) -> Protocol {
        self.shutdown.protocol()
    }

    pub fn listener(&self) -> &ListenerHandle {
        &self.listener
    }

    pub fn state(&self) -> ServerState {
        self.shutdown.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.shutdown.subscribe()
    }

    pub fn active_connections(&self) -> u64 {
        self.shutdown.tracker().active_count()
    }

    /// Soft drain bounded by `deadline`.
    pub async fn drain(&self, deadline: Duration) -> DrainOutcome {
        self.shutdown.drain(deadline).await
    }

    /// Immediate stop.
    pub fn stop(&self) {
        self.shutdown.stop_now()
    }

    pub fn accepting_paused(&self) -> bool {
        self.shutdown.accepting_paused()
    }

    /// See [`Shutdown::pause_accepting`].
    pub async fn pause_accepting(&self) -> AcceptPause {
        self.shutdown.pause_accepting().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_without_connections_is_immediate() {
        let shutdown = Shutdown::new(Protocol::Http);
        let outcome = tokio::time::timeout(Duration::from_millis(100), shutdown.drain(Duration::from_secs(5)))
            .await
            .expect("drain should not wait");
        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(shutdown.state(), ServerState::Draining);
        assert!(shutdown.stop_token().is_cancelled());
        assert!(!shutdown.force_token().is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_connections() {
        let shutdown = Shutdown::new(Protocol::Rpc);
        let guard = shutdown.tracker().track();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        let started = Instant::now();
        let outcome = shutdown.drain(Duration::from_secs(5)).await;
        assert_eq!(outcome, DrainOutcome::Drained);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn drain_times_out_and_forces() {
        let shutdown = Shutdown::new(Protocol::Rpc);
        let guard = shutdown.tracker().track();
        let force = shutdown.force_token();

        // Simulates a connection task that only exits when forced.
        tokio::spawn(async move {
            force.cancelled().await;
            drop(guard);
        });

        let outcome = shutdown.drain(Duration::from_millis(50)).await;
        assert_eq!(outcome, DrainOutcome::TimedOut { remaining: 1 });
        assert!(shutdown.force_token().is_cancelled());
        assert_eq!(shutdown.tracker().active_count(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_listener_close() {
        let shutdown = Shutdown::new(Protocol::Http);
        let closed = shutdown.start_serving().expect("fresh server can start");
        assert_eq!(shutdown.state(), ServerState::Serving);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(closed);
        });

        let started = Instant::now();
        assert_eq!(shutdown.drain(Duration::from_secs(5)).await, DrainOutcome::Drained);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn accept_loop_tracks_until_stopped() {
        let listener = Listener::bind(Protocol::Rpc, "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        let handle = listener.handle();
        let shutdown = Shutdown::new(Protocol::Rpc);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown
                    .accept_until_stopped(listener, move |stream, _, guard| {
                        let _ = tx.send((stream, guard));
                    })
                    .await
            })
        };

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, guard) = rx.recv().await.unwrap();
        assert_eq!(shutdown.tracker().active_count(), 1);
        assert_eq!(shutdown.state(), ServerState::Serving);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        assert_eq!(shutdown.drain(Duration::from_secs(5)).await, DrainOutcome::Drained);
        task.await.unwrap();
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn paused_accept_loop_leaves_connections_in_backlog() {
        let listener = Listener::bind(Protocol::Http, "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        let shutdown = Shutdown::new(Protocol::Http);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown
                    .accept_until_stopped(listener, move |stream, _, guard| {
                        let _ = tx.send((stream, guard));
                    })
                    .await
            })
        };
        shutdown
            .subscribe()
            .wait_for(|state| *state == ServerState::Serving)
            .await
            .unwrap();

        let pause = shutdown.pause_accepting().await;
        assert!(shutdown.accepting_paused());

        // The kernel completes the handshake, but nothing accepts it.
        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(shutdown.tracker().active_count(), 0);

        drop(pause);
        assert!(!shutdown.accepting_paused());
        let (_stream, guard) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("accept resumes after the pause")
            .unwrap();
        drop(guard);

        // Drain is not blocked by a pause either.
        let _pause = shutdown.pause_accepting().await;
        assert_eq!(shutdown.drain(Duration::from_secs(2)).await, DrainOutcome::Drained);
        task.await.unwrap();
    }

    #[test]
    fn draining_is_terminal() {
        let shutdown = Shutdown::new(Protocol::Http);
        shutdown.stop_now();
        assert_eq!(shutdown.state(), ServerState::Draining);
        assert!(shutdown.start_serving().is_none());
        assert_eq!(shutdown.state(), ServerState::Draining);
        assert!(shutdown.force_token().is_cancelled());
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let shutdown = Shutdown::new(Protocol::Http);
        let mut states = shutdown.subscribe();
        let _closed = shutdown.start_serving();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ServerState::Serving);

        shutdown.stop_now();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ServerState::Draining);
    }
}
