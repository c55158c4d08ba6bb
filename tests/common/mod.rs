//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use graceful_net::config::GracefulConfig;
use graceful_net::lifecycle::{ServerContext, ServerHandle, ServerState};
use graceful_net::net::{self, ListenerAddrs};

/// Config bound to ephemeral loopback ports.
pub fn test_config(slow_handler_ms: u64) -> GracefulConfig {
    let mut config = GracefulConfig::default();
    config.listeners.http_address = "127.0.0.1:0".to_string();
    config.listeners.rpc_address = "127.0.0.1:0".to_string();
    config.demo.slow_handler_ms = slow_handler_ms;
    config
}

/// Cold-start both servers and wait until they accept.
pub async fn start_servers(config: &GracefulConfig) -> ServerContext {
    let listeners = net::acquire(&ListenerAddrs::from(&config.listeners), None)
        .await
        .unwrap();
    let context = ServerContext::start(listeners, config);
    wait_serving(&context).await;
    context
}

pub async fn wait_serving(context: &ServerContext) {
    for handle in [context.http(), context.rpc()] {
        handle
            .subscribe()
            .wait_for(|state| *state == ServerState::Serving)
            .await
            .unwrap();
    }
}

/// HTTP client that never reuses connections.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

/// Reserve a free loopback port. Racy, but fine for tests.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Poll `check` until it returns `Some` or `timeout` elapses.
pub async fn eventually<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Some(value) = check().await {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

/// Wait until `handle` has exactly `count` live connections.
pub async fn wait_for_connections(handle: &ServerHandle, count: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.active_connections() != count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} {} connections, have {}",
            count,
            handle.protocol(),
            handle.active_connections()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the serving task has dropped its listener.
pub async fn wait_listener_closed(handle: &ServerHandle) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.listener().is_open() {
        assert!(tokio::time::Instant::now() < deadline, "{} listener still open", handle.protocol());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
