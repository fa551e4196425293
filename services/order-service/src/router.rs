//! Router for the order service.

use crate::handlers::{AppState, create_order};
use axum::{
    Router,
    routing::{get, post},
};
use order_pipeline_core::propagation::TraceCarrier;
use order_pipeline_web::{health_check, request_tracing_layer};
use std::sync::Arc;

/// Build the order service router.
///
/// - `POST /order`
/// - `GET /health`
///
/// Every route runs inside the request-tracing middleware, so an inbound
/// `traceparent` becomes the parent of the `create_order` span.
pub fn build_router(state: AppState, carrier: Arc<dyn TraceCarrier>) -> Router {
    Router::new()
        .route("/order", post(create_order))
        .route("/health", get(health_check))
        .layer(request_tracing_layer(carrier))
        .with_state(state)
}
