//! Zero-downtime restarts for a process serving HTTP and RPC.

#[cfg(not(unix))]
compile_error!("graceful-net passes listening sockets between processes and only supports Unix");

pub mod config;
pub mod http;
pub mod net;
pub mod lifecycle;
pub mod observability;
pub mod rpc;

pub use config::schema::GracefulConfig;
pub use http::HttpServer;
pub use lifecycle::{ServerContext, Shutdown};
pub use rpc::RpcServer;
