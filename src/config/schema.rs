//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the dual-protocol server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GracefulConfig {
    /// Listening addresses for both protocols.
    pub listeners: ListenerConfig,

    /// Drain and reload behaviour.
    pub shutdown: ShutdownConfig,

    /// HTTP server settings.
    pub http: HttpConfig,

    /// Demo handler settings.
    pub demo: DemoConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
///
/// Only consulted on cold start; a warm start adopts inherited sockets and
/// never binds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// HTTP bind address (e.g., "0.0.0.0:1111").
    pub http_address: String,

    /// RPC bind address (e.g., "0.0.0.0:1112").
    pub rpc_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            http_address: "0.0.0.0:1111".to_string(),
            rpc_address: "0.0.0.0:1112".to_string(),
        }
    }
}

/// What the process does when a reload cannot launch a successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadFailurePolicy {
    /// Log and exit with a failure status.
    #[default]
    Exit,
    /// Log and keep serving, waiting for the next signal.
    KeepServing,
}

/// Shutdown and reload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on how long in-flight requests may run once drain starts.
    pub drain_timeout_secs: u64,

    /// Behaviour when the successor process fails to spawn.
    pub on_reload_failure: ReloadFailurePolicy,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 20,
            on_reload_failure: ReloadFailurePolicy::Exit,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

/// Settings for the bundled demo handlers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DemoConfig {
    /// How long the slow HTTP index and the RPC `put` method take.
    pub slow_handler_ms: u64,
}

impl DemoConfig {
    pub fn slow_handler_delay(&self) -> Duration {
        Duration::from_millis(self.slow_handler_ms)
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            slow_handler_ms: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default `tracing` filter directive; `RUST_LOG` takes precedence.
    pub log_filter: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "graceful_net=info,tower_http=info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_1111_and_1112() {
        let config = GracefulConfig::default();
        assert_eq!(config.listeners.http_address, "0.0.0.0:1111");
        assert_eq!(config.listeners.rpc_address, "0.0.0.0:1112");
        assert_eq!(config.shutdown.drain_timeout(), Duration::from_secs(20));
        assert_eq!(config.shutdown.on_reload_failure, ReloadFailurePolicy::Exit);
        assert_eq!(config.demo.slow_handler_delay(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: GracefulConfig = toml::from_str(
            r#"
            [shutdown]
            drain_timeout_secs = 5
            on_reload_failure = "keep-serving"
            "#,
        )
        .unwrap();

        assert_eq!(config.shutdown.drain_timeout_secs, 5);
        assert_eq!(config.shutdown.on_reload_failure, ReloadFailurePolicy::KeepServing);
        assert_eq!(config.listeners.http_address, "0.0.0.0:1111");
        assert_eq!(config.http.request_timeout_secs, 30);
    }
}
