//! HTTP handlers for reading reports.

use crate::store::{OrderReport, ReportStore};
use axum::{Json, extract::State};
use order_pipeline_web::RequestId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state for the report routes.
#[derive(Clone)]
pub struct AppState {
    /// Store filled by the consumer loop
    pub store: Arc<ReportStore>,
}

impl AppState {
    /// Wrap a store shared with the consumer.
    #[must_use]
    pub const fn new(store: Arc<ReportStore>) -> Self {
        Self { store }
    }
}

/// Body of `GET /reports`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportsResponse {
    /// Snapshot of every stored report
    pub reports: Vec<OrderReport>,
    /// `reports.len()`
    pub total: usize,
}

/// List every report processed so far.
///
/// # Endpoint
///
/// ```text
/// GET /reports
/// ```
///
/// # Response
///
/// ```json
/// { "reports": [ { "order_id": "...", "total_price": 150, ... } ], "total": 1 }
/// ```
#[allow(clippy::unused_async)]
pub async fn get_reports(
    State(state): State<AppState>,
    request_id: RequestId,
) -> Json<ReportsResponse> {
    let reports = state.store.snapshot();
    let total = reports.len();

    tracing::info!(
        total_reports = total,
        request_id = %request_id.0,
        "Reports retrieved"
    );

    Json(ReportsResponse { reports, total })
}
