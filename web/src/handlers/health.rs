//! Health check endpoint.
//!
//! Used by load balancers and container orchestrators to verify the process
//! is serving. It does not check the broker.

use crate::extractors::UserAgent;
use axum::Json;
use serde::Serialize;

/// Health response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests
    pub status: &'static str,
}

/// Liveness check.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ok" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check(user_agent: UserAgent) -> Json<HealthResponse> {
    tracing::debug!(user_agent = %user_agent.0, "Health check requested");
    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check_body() {
        let Json(body) = health_check(UserAgent("kube-health".to_string())).await;
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_health_route_returns_json() {
        let app = Router::new().route("/health", get(health_check));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "ok" }));
    }
}
