//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stderr, shared by predecessor and successor)
//!     → Whatever `metrics` recorder the embedder installs
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Process id on every line so overlapping generations can be told apart
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
