//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate listen addresses parse and do not collide
//! - Validate value ranges (timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GracefulConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::GracefulConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &GracefulConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let http = parse_address("listeners.http_address", &config.listeners.http_address, &mut errors);
    let rpc = parse_address("listeners.rpc_address", &config.listeners.rpc_address, &mut errors);

    if let (Some(http), Some(rpc)) = (http, rpc) {
        // Port 0 asks the OS for any free port, so two of them never collide.
        if http == rpc && http.port() != 0 {
            errors.push(ValidationError {
                field: "listeners.rpc_address",
                message: format!("must differ from the HTTP address ({})", http),
            });
        }
    }

    if config.shutdown.drain_timeout_secs == 0 {
        errors.push(ValidationError {
            field: "shutdown.drain_timeout_secs",
            message: "must be greater than zero".to_string(),
        });
    }

    if config.http.request_timeout_secs == 0 {
        errors.push(ValidationError {
            field: "http.request_timeout_secs",
            message: "must be greater than zero".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn parse_address(
    field: &'static str,
    value: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<SocketAddr> {
    match value.parse() {
        Ok(addr) => Some(addr),
        Err(e) => {
            errors.push(ValidationError {
                field,
                message: format!("invalid socket address {:?}: {}", value, e),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GracefulConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = GracefulConfig::default();
        config.listeners.http_address = "not-an-address".into();
        config.shutdown.drain_timeout_secs = 0;
        config.http.request_timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listeners.http_address",
                "shutdown.drain_timeout_secs",
                "http.request_timeout_secs"
            ]
        );
    }

    #[test]
    fn rejects_identical_addresses() {
        let mut config = GracefulConfig::default();
        config.listeners.rpc_address = config.listeners.http_address.clone();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "listeners.rpc_address");
    }

    #[test]
    fn ephemeral_ports_may_share_an_address() {
        let mut config = GracefulConfig::default();
        config.listeners.http_address = "127.0.0.1:0".into();
        config.listeners.rpc_address = "127.0.0.1:0".into();
        assert!(validate_config(&config).is_ok());
    }
}
