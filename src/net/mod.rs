//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Cold start:  config addresses → listener.rs (bind)          ┐
//! Warm start:  fds 3,4 → handoff.rs (manifest, fstat)         ├→ Listeners { http, rpc }
//!                      → listener.rs (adopt)                  ┘
//! Serving:     Listener::accept → connection.rs (guard per connection)
//! Reload:      ListenerHandle → handoff.rs (dup above fd 100) → successor
//! ```
//!
//! # Design Decisions
//! - Listening sockets are the only resource shared across processes
//! - Established connections are never handed off; they drain in place
//! - Each connection is tracked so drain knows when it is done

pub mod connection;
pub mod handoff;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use handoff::{HandoffError, InheritedListeners};
pub use listener::{acquire, Listener, ListenerAddrs, ListenerError, ListenerHandle, Listeners, Protocol};
