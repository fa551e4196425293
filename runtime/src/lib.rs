//! # Order Pipeline Runtime
//!
//! Runtime components for the consuming side of the order pipeline.
//!
//! ## Core Components
//!
//! - **Delivery consumer**: subscribes once, runs each delivery in a span
//!   parented on the producer's trace, and settles it with ack or nack
//! - **Metrics**: Prometheus exporter and the pipeline's metric recorders
//!
//! ## Example
//!
//! ```ignore
//! use order_pipeline_runtime::{DeliveryConsumer, DeliveryHandler};
//!
//! let consumer = DeliveryConsumer::builder()
//!     .name("report-service")
//!     .topic("orders")
//!     .bus(bus)
//!     .handler(Arc::new(MyHandler))
//!     .shutdown(shutdown_rx)
//!     .build()?;
//!
//! let handle = consumer.start().await?;
//! ```

/// Sequential subscribe-process-settle loop
pub mod consumer;

/// Prometheus metrics for observability
pub mod metrics;

pub use consumer::{
    ConsumerError, ConsumerExit, DEFAULT_MAX_ATTEMPTS, DEFAULT_SPAN_NAME, DeliveryConsumer,
    DeliveryConsumerBuilder, DeliveryHandler, HandlerError,
};
pub use metrics::{BusMetrics, MetricsError, MetricsServer, OrderMetrics, ReportMetrics};
