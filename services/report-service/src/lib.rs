//! Report service: the consuming half of the order pipeline.
//!
//! A single background [`DeliveryConsumer`](order_pipeline_runtime::DeliveryConsumer)
//! subscribes to the `orders` topic once at startup. Each `OrderCreated`
//! envelope continues the producer's trace, becomes an
//! [`OrderReport`](store::OrderReport) in the shared [`ReportStore`](store::ReportStore),
//! and is acknowledged only after the append. `GET /reports` serves a snapshot.
//! [`service::run`] keeps the two halves together: if the consumer stops, the
//! server stops too.

pub mod config;
pub mod consumer;
pub mod handlers;
pub mod router;
pub mod service;
pub mod store;

pub use config::Config;
pub use consumer::{ReportHandler, report_consumer};
pub use handlers::{AppState, ReportsResponse};
pub use router::build_router;
pub use service::{ConsumerTask, ServiceExit};
pub use store::{OrderReport, ReportStore};
