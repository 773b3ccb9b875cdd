//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use huddle_core::RouteOutcome;
use huddle_protocol::SignalKind;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const PARTICIPANTS_PRESENT: &str = "huddle_participants_present";
    pub const MESSAGES_TOTAL: &str = "huddle_messages_total";
    pub const SIGNALS_TOTAL: &str = "huddle_signals_total";
    pub const LATENCY_SECONDS: &str = "huddle_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(
        names::PARTICIPANTS_PRESENT,
        "Current number of presence entries"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of events processed");
    metrics::describe_counter!(
        names::SIGNALS_TOTAL,
        "Signaling payloads by kind and outcome"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound event handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

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

/// Record an event in the given direction.
pub fn record_message(event: &'static str, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "event" => event, "direction" => direction).increment(1);
}

/// Record the outcome of routing one signaling payload.
pub fn record_signal(kind: SignalKind, outcome: &RouteOutcome) {
    let result = match outcome {
        RouteOutcome::Delivered(_) => "delivered",
        RouteOutcome::Dropped(reason) => reason.as_str(),
    };
    counter!(names::SIGNALS_TOTAL, "kind" => kind.as_str(), "outcome" => result).increment(1);
}

/// Update the present participant count.
pub fn set_participants(count: usize) {
    gauge!(names::PARTICIPANTS_PRESENT).set(count as f64);
}

/// Record event handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
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

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::DropReason;

    #[test]
    fn test_recording_without_exporter() {
        // No recorder installed: every call must be a no-op
        let _guard = ConnectionMetricsGuard::new();
        record_signal(SignalKind::Offer, &RouteOutcome::Dropped(DropReason::TargetNotPresent));
        record_message("audio-offer", "inbound");
        set_participants(3);
    }
}
