//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_relay_core::HubStats;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const REGISTERED_ACTORS: &str = "relay_registered_actors";
    pub const BROADCASTS_TOTAL: &str = "relay_broadcasts_total";
    pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
    pub const DROPPED_TOTAL: &str = "relay_dropped_deliveries_total";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_gauge!(
        names::REGISTERED_ACTORS,
        "Connections currently registered with the hub"
    );
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Broadcasts applied by the hub");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Payloads placed on outbound queues"
    );
    metrics::describe_counter!(
        names::DROPPED_TOTAL,
        "Payloads dropped because an outbound queue was full"
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

/// Mirror hub statistics into metrics until the hub stops.
pub fn spawn_reporter(mut stats: watch::Receiver<HubStats>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while stats.changed().await.is_ok() {
            let snapshot = *stats.borrow_and_update();
            record_hub_stats(&snapshot);
        }
    })
}

/// Record a hub statistics snapshot.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::REGISTERED_ACTORS).set(stats.registered as f64);
    counter!(names::BROADCASTS_TOTAL).absolute(stats.broadcasts);
    counter!(names::DELIVERIES_TOTAL).absolute(stats.delivered);
    counter!(names::DROPPED_TOTAL).absolute(stats.dropped);
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

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
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
    use std::time::Duration;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; just make sure nothing panics
        let _guard = ConnectionMetricsGuard::new();
        record_error("test");
    }

    #[tokio::test]
    async fn test_reporter_stops_with_hub() {
        let (tx, rx) = watch::channel(HubStats::default());
        let reporter = spawn_reporter(rx);

        tx.send_replace(HubStats {
            registered: 1,
            broadcasts: 2,
            delivered: 2,
            dropped: 0,
        });
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), reporter)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }
}
