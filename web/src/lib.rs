//! Axum integration for the order pipeline services.
//!
//! Both HTTP front ends share the same shell:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  request_tracing_layer                   │  ← X-Request-ID, traceparent
//! │  ┌────────────────────────────────────┐  │
//! │  │  route handlers                    │  ← JSON in, AppError out
//! │  └────────────────────────────────────┘  │
//! │  "HTTP request completed" log            │  ← method, path, status, duration
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use order_pipeline_web::{AppError, health_check, request_tracing_layer};
//! use axum::{Router, routing::{get, post}};
//!
//! let app = Router::new()
//!     .route("/order", post(create_order))
//!     .route("/health", get(health_check))
//!     .layer(request_tracing_layer(carrier))
//!     .with_state(state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;

// Re-export key types for convenience
pub use error::{AppError, ErrorKind};
pub use extractors::{RequestId, UserAgent, client_ip};
pub use handlers::{HealthResponse, health_check};
pub use lifecycle::{await_task, shutdown_signal};
pub use middleware::{REQUEST_ID_HEADER, RequestTracingLayer, request_tracing_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
