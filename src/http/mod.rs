//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper auto: HTTP/1.1 or HTTP/2)
//!     → middleware (request id, trace, timeout, x-server-pid)
//!     → handlers.rs
//!     → Send to client
//! ```

pub mod handlers;
pub mod server;

pub use server::{HttpServer, X_SERVER_PID};
