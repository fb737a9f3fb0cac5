//! Metrics collection and export for deskrelay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use deskrelay_core::RouterStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "deskrelay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "deskrelay_connections_active";
    pub const ENVELOPES_TOTAL: &str = "deskrelay_envelopes_total";
    pub const EVENTS_TOTAL: &str = "deskrelay_events_total";
    pub const DEVICES_KNOWN: &str = "deskrelay_devices_known";
    pub const DEVICES_ONLINE: &str = "deskrelay_devices_online";
    pub const ADMINS_ACTIVE: &str = "deskrelay_admins_active";
    pub const LATENCY_SECONDS: &str = "deskrelay_envelope_latency_seconds";
    pub const ERRORS_TOTAL: &str = "deskrelay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of streaming connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of streaming connections"
    );
    metrics::describe_counter!(names::ENVELOPES_TOTAL, "Inbound envelopes by kind");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Outbound events by kind");
    metrics::describe_gauge!(names::DEVICES_KNOWN, "Devices that have ever registered");
    metrics::describe_gauge!(names::DEVICES_ONLINE, "Devices with a live connection");
    metrics::describe_gauge!(names::ADMINS_ACTIVE, "Connected admin consoles");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Envelope routing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an inbound envelope.
pub fn record_envelope(kind: &'static str) {
    counter!(names::ENVELOPES_TOTAL, "kind" => kind).increment(1);
}

/// Record an outbound event.
pub fn record_event(kind: &'static str) {
    counter!(names::EVENTS_TOTAL, "kind" => kind).increment(1);
}

/// Record routing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update registry gauges.
pub fn set_router_stats(stats: &RouterStats) {
    gauge!(names::DEVICES_KNOWN).set(stats.device_count as f64);
    gauge!(names::DEVICES_ONLINE).set(stats.online_count as f64);
    gauge!(names::ADMINS_ACTIVE).set(stats.admin_count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
