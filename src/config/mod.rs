//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, apply CLI overrides)
//!     → validation.rs (semantic checks)
//!     → GracefulConfig (validated, immutable)
//!     → handed to bootstrap, servers and the control loop
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new config takes effect on the next
//!   reload, when the successor process loads it
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    DemoConfig, GracefulConfig, HttpConfig, ListenerConfig, ObservabilityConfig, ReloadFailurePolicy,
    ShutdownConfig,
};
pub use validation::ValidationError;
