//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_events_forwarded_total` (counter): events that passed every stage
//! - `gateway_events_dropped_total` (counter): dropped events by stage
//! - `gateway_rest_requests_total` (counter): REST requests by method, status
//! - `gateway_callback_events_total` (counter): events received by interface
//!
//! Without an installed recorder every update is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_event_forwarded() {
    metrics::counter!("gateway_events_forwarded_total").increment(1);
}

pub fn record_event_dropped(stage: &'static str) {
    metrics::counter!("gateway_events_dropped_total", "stage" => stage).increment(1);
}

pub fn record_rest_request(method: &str, status: u16) {
    metrics::counter!(
        "gateway_rest_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_callback_events(interface: &str, count: usize) {
    metrics::counter!("gateway_callback_events_total", "interface" => interface.to_string())
        .increment(count as u64);
}
