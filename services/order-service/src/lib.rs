//! Order service: the producing half of the order pipeline.
//!
//! Accepts `POST /order`, validates the body, publishes an
//! [`OrderCreatedEvent`](types::OrderCreatedEvent) to the `orders` topic with
//! the caller's trace context in the envelope headers, and answers
//! `201 { order_id, status: "created" }`.
//!
//! The event types in [`types`] are the contract the report service consumes.

pub mod config;
pub mod handlers;
pub mod producer;
pub mod router;
pub mod types;

pub use config::Config;
pub use handlers::AppState;
pub use producer::{OrderProducer, ProducerError};
pub use router::build_router;
pub use types::{
    ORDER_CREATED, ORDERS_TOPIC, OrderCreatedEvent, OrderRequest, OrderResponse, ValidOrder,
    ValidationError,
};
