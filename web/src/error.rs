//! Error types for web handlers.
//!
//! [`AppError`] is what handlers return when an order cannot be accepted.
//! It renders as a JSON body with a stable machine code and a message that is
//! safe to show the caller:
//!
//! ```json
//! { "code": "BAD_REQUEST", "message": "total_price must be positive" }
//! ```
//!
//! Server-side causes (broker failures, serialization bugs) are attached with
//! [`AppError::with_source`] and only ever reach the log.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Category of a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is unusable (bad JSON, failed validation).
    BadRequest,
    /// The request was fine but the service could not complete it.
    Internal,
}

impl ErrorKind {
    /// HTTP status for this kind.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code placed in the response body.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL_SERVER_ERROR",
        }
    }
}

/// Handler error rendered as a JSON response.
///
/// ```ignore
/// async fn create(body: Json<OrderRequest>) -> Result<StatusCode, AppError> {
///     let order = body.validate().map_err(|e| AppError::bad_request(e.to_string()))?;
///     producer.publish(order).await.map_err(|e| {
///         AppError::internal("Failed to publish event").with_source(e.into())
///     })?;
///     Ok(StatusCode::CREATED)
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    // never serialized
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Error of the given kind with a caller-facing message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach the underlying cause for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status this error maps to.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Caller-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let cause = self.source.as_ref().map(|e| format!("{e:#}"));
        match self.kind {
            ErrorKind::BadRequest => {
                tracing::warn!(reason = %self.message, "Request rejected");
            },
            ErrorKind::Internal => {
                tracing::error!(
                    reason = %self.message,
                    error = cause.as_deref().unwrap_or("none"),
                    "Request failed"
                );
            },
        }

        let body = ErrorBody {
            code: self.kind.code(),
            message: &self.message,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = AppError::bad_request("customer_id is required");
        assert_eq!(err.to_string(), "[BAD_REQUEST] customer_id is required");
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_error_keeps_cause_out_of_message() {
        let err = AppError::internal("Failed to publish event")
            .with_source(anyhow::anyhow!("broker unreachable"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "Failed to publish event");
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string),
            Some("broker unreachable".to_string())
        );
    }

    #[test]
    fn anyhow_errors_become_internal() {
        let err: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message(), "An internal error occurred");
    }

    #[test]
    fn response_status_follows_kind() {
        let response = AppError::bad_request("total_price is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = AppError::internal("Failed to serialize event").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
