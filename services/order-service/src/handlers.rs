//! HTTP handlers for order intake.

use crate::producer::{OrderProducer, ProducerError};
use crate::types::{OrderRequest, OrderResponse};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use order_pipeline_runtime::metrics::OrderMetrics;
use order_pipeline_web::{AppError, RequestId};
use std::sync::Arc;

/// Shared state for the order routes.
#[derive(Clone)]
pub struct AppState {
    /// Producer every request goes through
    pub producer: Arc<OrderProducer>,
}

impl AppState {
    /// Wrap a producer.
    #[must_use]
    pub fn new(producer: OrderProducer) -> Self {
        Self {
            producer: Arc::new(producer),
        }
    }
}

impl From<ProducerError> for AppError {
    fn from(err: ProducerError) -> Self {
        match err {
            ProducerError::Validation(e) => Self::bad_request(e.to_string()),
            ProducerError::Serialization(e) => {
                Self::internal("Failed to serialize event").with_source(e.into())
            },
            ProducerError::Publish(e) => {
                Self::internal("Failed to publish event").with_source(e.into())
            },
        }
    }
}

/// Create an order.
///
/// # Endpoint
///
/// ```text
/// POST /order
/// { "total_price": 150, "customer_id": 7, "product_id": 3 }
/// ```
///
/// # Responses
///
/// - `201 Created` `{ "order_id": "<uuid>", "status": "created" }`
/// - `400 Bad Request` for malformed JSON or a failed validation
/// - `500 Internal Server Error` if the event could not be published
///
/// # Errors
///
/// Returns [`AppError`] for the 400 and 500 cases above.
pub async fn create_order(
    State(state): State<AppState>,
    request_id: RequestId,
    payload: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(
            request_id = %request_id.0,
            error = %rejection.body_text(),
            "Invalid order request - JSON decoding failed"
        );
        OrderMetrics::record_rejected("malformed");
        AppError::from(rejection)
    })?;

    tracing::info!(
        request_id = %request_id.0,
        total_price = ?request.total_price,
        customer_id = ?request.customer_id,
        product_id = ?request.product_id,
        "Order request parsed"
    );

    let response = state.producer.handle_create_order(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
