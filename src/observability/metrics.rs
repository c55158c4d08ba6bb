//! Metrics collection.
//!
//! # Responsibilities
//! - Define server metrics (connections, requests, drains, reloads)
//! - Record through the `metrics` facade so any recorder can be installed
//!
//! # Metrics
//! - `graceful_connections_active` (gauge): live connections by protocol
//! - `graceful_requests_total` (counter): requests by protocol, outcome
//! - `graceful_drain_duration_seconds` (histogram): time spent draining
//! - `graceful_drain_timeouts_total` (counter): drains cut short by the deadline
//! - `graceful_reloads_total` (counter): reload attempts by outcome
//!
//! # Design Decisions
//! - No exporter endpoint: a scrape port would not survive the hand-off
//! - Low-overhead metric updates; without a recorder they are no-ops

use std::time::Duration;

use crate::net::listener::Protocol;

pub fn set_active_connections(protocol: Protocol, count: u64) {
    ::metrics::gauge!("graceful_connections_active", "protocol" => protocol.as_str()).set(count as f64);
}

pub fn record_request(protocol: Protocol, outcome: &'static str) {
    ::metrics::counter!(
        "graceful_requests_total",
        "protocol" => protocol.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_drain(protocol: Protocol, elapsed: Duration, timed_out: bool) {
    ::metrics::histogram!("graceful_drain_duration_seconds", "protocol" => protocol.as_str())
        .record(elapsed.as_secs_f64());
    if timed_out {
        ::metrics::counter!("graceful_drain_timeouts_total", "protocol" => protocol.as_str()).increment(1);
    }
}

pub fn record_reload(outcome: &'static str) {
    ::metrics::counter!("graceful_reloads_total", "outcome" => outcome).increment(1);
}
