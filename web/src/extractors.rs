//! Custom Axum extractors.
//!
//! - `RequestId`: request id assigned by the tracing middleware
//! - `UserAgent`: `User-Agent` header
//!
//! # Examples
//!
//! ```ignore
//! use order_pipeline_web::extractors::{RequestId, UserAgent};
//!
//! async fn handler(request_id: RequestId, user_agent: UserAgent) -> Json<Response> {
//!     tracing::info!(
//!         request_id = %request_id.0,
//!         user_agent = %user_agent.0,
//!         "Processing request"
//!     );
//!     Json(response)
//! }
//! ```

use crate::middleware::REQUEST_ID_HEADER;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use std::net::{IpAddr, Ipv4Addr};
use uuid::Uuid;

/// Request id for log correlation.
///
/// Prefers the id stored by [`crate::middleware::request_tracing_layer`],
/// then the `X-Request-ID` header, then a fresh UUID v4. Outside the
/// middleware the id is therefore not echoed on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(id.clone());
        }

        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

        Ok(Self(request_id))
    }
}

/// Client IP from proxy headers.
///
/// # Priority
///
/// 1. `X-Forwarded-For` (first IP in the list)
/// 2. `X-Real-IP`
/// 3. `127.0.0.1`
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> IpAddr {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    let real_ip = || {
        headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// User-Agent header.
///
/// Extracts the `User-Agent` header, or returns "Unknown" if not present.
#[derive(Debug, Clone)]
pub struct UserAgent(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserAgent
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("Unknown")
            .to_string();

        Ok(Self(user_agent))
    }
}
