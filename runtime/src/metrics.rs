//! Prometheus metrics for the order pipeline.
//!
//! Covers both stages:
//! - Order intake (created / rejected)
//! - Bus publish and delivery settlement
//! - Report storage, including timestamp fallbacks
//!
//! Recording is always safe: without an installed recorder the macros are
//! no-ops, so library code records unconditionally.
//!
//! # Example
//!
//! ```rust,no_run
//! use order_pipeline_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the scrape endpoint listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Install the recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built (including bind failures)
    /// or the recorder cannot be installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs a
    /// warning and returns `Ok(())` without a render handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                register_metrics();
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!("Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Order intake
    describe_counter!(
        "orders_created_total",
        "Total number of orders accepted and published"
    );
    describe_counter!(
        "orders_rejected_total",
        "Total number of orders rejected, labelled by reason"
    );

    // Bus
    describe_counter!(
        "bus_messages_published_total",
        "Total number of envelopes published to the bus"
    );
    describe_counter!(
        "bus_publish_errors_total",
        "Total number of failed publish attempts"
    );
    describe_histogram!(
        "bus_publish_duration_seconds",
        "Time taken to publish an envelope"
    );
    describe_counter!(
        "bus_deliveries_acked_total",
        "Total number of deliveries acknowledged"
    );
    describe_counter!(
        "bus_deliveries_nacked_total",
        "Total number of deliveries rejected for redelivery"
    );
    describe_counter!(
        "bus_deliveries_discarded_total",
        "Total number of deliveries dropped after exhausting their attempts"
    );
    describe_histogram!(
        "delivery_processing_duration_seconds",
        "Time taken to handle one delivery"
    );

    // Reports
    describe_counter!(
        "reports_stored_total",
        "Total number of reports appended to the store"
    );
    describe_counter!(
        "reports_created_at_fallback_total",
        "Reports stored with the processing time substituted for an unparseable createdAt"
    );
}

/// Order intake metrics recorder.
pub struct OrderMetrics;

impl OrderMetrics {
    /// Record an accepted order.
    pub fn record_created() {
        counter!("orders_created_total").increment(1);
    }

    /// Record a rejected order.
    ///
    /// `reason` is a low-cardinality label such as `validation` or `publish`.
    pub fn record_rejected(reason: &'static str) {
        counter!("orders_rejected_total", "reason" => reason).increment(1);
    }
}

/// Message bus metrics recorder.
pub struct BusMetrics;

impl BusMetrics {
    /// Record a successful publish.
    pub fn record_publish(duration: Duration) {
        counter!("bus_messages_published_total").increment(1);
        histogram!("bus_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a publish error.
    pub fn record_publish_error() {
        counter!("bus_publish_errors_total").increment(1);
    }

    /// Record an acknowledged delivery.
    pub fn record_ack(duration: Duration) {
        counter!("bus_deliveries_acked_total").increment(1);
        histogram!("delivery_processing_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a rejected delivery.
    pub fn record_nack(duration: Duration) {
        counter!("bus_deliveries_nacked_total").increment(1);
        histogram!("delivery_processing_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a delivery dropped after its last allowed attempt.
    pub fn record_discard(duration: Duration) {
        counter!("bus_deliveries_discarded_total").increment(1);
        histogram!("delivery_processing_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Report store metrics recorder.
pub struct ReportMetrics;

impl ReportMetrics {
    /// Record a stored report.
    pub fn record_stored() {
        counter!("reports_stored_total").increment(1);
    }

    /// Record a createdAt fallback.
    pub fn record_created_at_fallback() {
        counter!("reports_created_at_fallback_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        let result = server.start();
        assert!(result.is_ok());

        OrderMetrics::record_created();
        BusMetrics::record_publish(Duration::from_millis(5));
        ReportMetrics::record_stored();

        // handle is None if another test already installed the recorder
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("orders_created_total"));
            assert!(rendered.contains("bus_messages_published_total"));
            assert!(rendered.contains("reports_stored_total"));
        }
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        OrderMetrics::record_rejected("validation");
        BusMetrics::record_publish_error();
        BusMetrics::record_ack(Duration::from_millis(1));
        BusMetrics::record_nack(Duration::from_millis(1));
        BusMetrics::record_discard(Duration::from_millis(1));
        ReportMetrics::record_created_at_fallback();
    }
}
