//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define registry metrics (registrations, dispatch, snapshot swaps)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `whiteboard_registrations_total` (counter): registrations by kind, outcome
//! - `whiteboard_dispatch_total` (counter): dispatch lookups by result
//! - `whiteboard_snapshot_swaps_total` (counter): published snapshots by table
//! - `whiteboard_active_handlers` (gauge): serving handlers by kind
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Without an installed recorder every call is a no-op, so the registry
//!   core records unconditionally

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::registry::runtime::HandlerKind;

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Outcome of a registration: `active`, `shadowed`, `rejected` or `removed`.
pub fn record_registration(kind: HandlerKind, outcome: &'static str) {
    metrics::counter!(
        "whiteboard_registrations_total",
        "kind" => kind.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Dispatch result: `servlet`, `alias` or `none`.
pub fn record_dispatch(result: &'static str) {
    metrics::counter!("whiteboard_dispatch_total", "result" => result).increment(1);
}

pub fn record_snapshot_swap(table: &'static str) {
    metrics::counter!("whiteboard_snapshot_swaps_total", "table" => table).increment(1);
}

pub fn set_active_handlers(kind: HandlerKind, count: usize) {
    metrics::gauge!("whiteboard_active_handlers", "kind" => kind.as_str()).set(count as f64);
}
