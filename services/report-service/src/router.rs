//! Router for the report service.

use crate::handlers::{AppState, get_reports};
use axum::{Router, routing::get};
use order_pipeline_core::propagation::TraceCarrier;
use order_pipeline_web::{health_check, request_tracing_layer};
use std::sync::Arc;

/// Build the report service router.
///
/// - `GET /reports`
/// - `GET /health`
pub fn build_router(state: AppState, carrier: Arc<dyn TraceCarrier>) -> Router {
    Router::new()
        .route("/reports", get(get_reports))
        .route("/health", get(health_check))
        .layer(request_tracing_layer(carrier))
        .with_state(state)
}
