//! Metrics collection and export for the relay gateway.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "relay_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "relay_sessions_active";
    pub const EVENTS_TOTAL: &str = "relay_events_total";
    pub const CONNECT_FAILURES_TOTAL: &str = "relay_connect_failures_total";
    pub const RELAY_MISSES_TOTAL: &str = "relay_misses_total";
    pub const BACKEND_FAULTS_TOTAL: &str = "relay_backend_faults_total";
    pub const BACKENDS_HEALTHY: &str = "relay_backends_healthy";
    pub const ROOMS_ACTIVE: &str = "relay_rooms_active";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of external sessions since server start"
    );
    metrics::describe_gauge!(
        names::SESSIONS_ACTIVE,
        "Current number of external sessions"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Events relayed, by domain and direction");
    metrics::describe_counter!(
        names::CONNECT_FAILURES_TOTAL,
        "Backend sessions that could not be opened"
    );
    metrics::describe_counter!(
        names::RELAY_MISSES_TOTAL,
        "Client events with no backend session"
    );
    metrics::describe_counter!(
        names::BACKEND_FAULTS_TOTAL,
        "Established backend sessions that failed"
    );
    metrics::describe_gauge!(names::BACKENDS_HEALTHY, "Current healthy backend sessions");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of signaling rooms");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a relayed event.
pub fn record_event(namespace: &'static str, direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "namespace" => namespace, "direction" => direction).increment(1);
}

/// Record a backend session that could not be opened.
pub fn record_connect_failure(namespace: &'static str) {
    counter!(names::CONNECT_FAILURES_TOTAL, "namespace" => namespace).increment(1);
}

/// Record a client event with no backend session.
pub fn record_relay_miss(namespace: &'static str) {
    counter!(names::RELAY_MISSES_TOTAL, "namespace" => namespace).increment(1);
}

/// Record a failed backend session.
pub fn record_backend_fault(namespace: &'static str) {
    counter!(names::BACKEND_FAULTS_TOTAL, "namespace" => namespace).increment(1);
}

/// Update the healthy backend session count.
pub fn set_healthy_backends(namespace: &'static str, count: usize) {
    gauge!(names::BACKENDS_HEALTHY, "namespace" => namespace).set(count as f64);
}

/// Update the active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records the end of a session on drop.
pub struct SessionMetricsGuard {
    namespace: &'static str,
}

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session.
    #[must_use]
    pub fn new(namespace: &'static str) -> Self {
        counter!(names::SESSIONS_TOTAL, "namespace" => namespace).increment(1);
        gauge!(names::SESSIONS_ACTIVE, "namespace" => namespace).increment(1.0);
        Self { namespace }
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE, "namespace" => self.namespace).decrement(1.0);
    }
}
