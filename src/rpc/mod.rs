//! RPC protocol subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (line framing, one request at a time)
//!     → protocol.rs (JSON-RPC 2.0 parse)
//!     → service.rs (method dispatch)
//!     → protocol.rs (response) → client
//! ```
//!
//! # Design Decisions
//! - Newline-delimited JSON keeps framing trivial and greppable
//! - Per-request failures become JSON-RPC error objects, never connection errors
//! - Drain closes idle connections at once and busy ones after their reply

pub mod client;
pub mod protocol;
pub mod server;
pub mod service;

pub use client::{RpcClient, RpcClientError};
pub use protocol::{RpcRequest, RpcResponse};
pub use server::RpcServer;
pub use service::{DemoService, ItemRequest, RpcService, ServiceResponse};

use crate::rpc::protocol::{INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};

/// Error type for a single RPC call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// JSON-RPC error code.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) => PARSE_ERROR,
            RpcError::InvalidRequest(_) => INVALID_REQUEST,
            RpcError::MethodNotFound(_) => METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => INVALID_PARAMS,
            RpcError::Internal(_) => INTERNAL_ERROR,
        }
    }
}
