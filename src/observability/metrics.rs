//! Metrics collection and exposition.
//!
//! # Metrics
//! - `broker_net_bytes_received_total` (counter): bytes read from sockets
//! - `broker_net_bytes_sent_total` (counter): bytes written to sockets
//! - `broker_net_fast_close_total` (counter): fast closes by `outcome`
//!   (`abrupt`, `graceful`, `failed`, `timeout`)
//! - `broker_net_accepts_total` (counter): accept finalizations by `outcome`
//!   (`ready`, `rejected`)
//!
//! Counters are recorded through the `metrics` facade wherever the event
//! happens; without an installed recorder they cost nothing.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}
