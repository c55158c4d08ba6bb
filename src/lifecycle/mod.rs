//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Listeners → HttpServer + RpcServer → serving tasks
//!
//! Control (control.rs, signals.rs):
//!     SIGUSR1         → reload.rs (spawn successor) → drain both
//!     SIGTERM/SIGINT  → drain HTTP, stop RPC
//!
//! Shutdown (shutdown.rs):
//!     Stop accepting → Drain connections (bounded) → Force close
//! ```
//!
//! # Design Decisions
//! - Ordered reload: spawn first, drain second
//! - Shutdown has timeout: forced close after deadline
//! - One signal per process generation

pub mod control;
pub mod reload;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use control::{ControlLoop, ControlOutcome, ControlState};
pub use reload::{successor_args, ReloadCoordinator, ReloadError, ReloadSession, Reloader, Successor};
pub use shutdown::{AcceptPause, DrainOutcome, ServerHandle, ServerState, Shutdown};
pub use signals::{SignalEvent, SignalListener};
pub use startup::ServerContext;
