//! Request, response and event types for order intake.
//!
//! `OrderCreatedEvent` is the wire contract between the two services; the
//! report service deserializes exactly this type.

use chrono::{DateTime, SecondsFormat, Utc};
use order_pipeline_core::event::Event;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic order events are published to.
pub const ORDERS_TOPIC: &str = "orders";

/// Event type name, also written to the `event_type` header.
pub const ORDER_CREATED: &str = "OrderCreated";

/// Response status for an accepted order.
pub const STATUS_CREATED: &str = "created";

/// Request validation failures, each naming the offending field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Field absent from the request body
    #[error("{0} is required")]
    Missing(&'static str),

    /// Field present but zero or negative where a positive value is needed
    #[error("{0} must be positive")]
    NotPositive(&'static str),

    /// Identifier field present but zero
    #[error("{0} must be non-zero")]
    Zero(&'static str),
}

/// Body of `POST /order`.
///
/// Fields are optional on the wire so that an absent field is reported by
/// name instead of as a generic decoding failure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Order total in minor units
    pub total_price: Option<i64>,
    /// Customer placing the order
    pub customer_id: Option<i64>,
    /// Product being ordered
    pub product_id: Option<i64>,
}

impl OrderRequest {
    /// Build a complete request.
    #[must_use]
    pub const fn new(total_price: i64, customer_id: i64, product_id: i64) -> Self {
        Self {
            total_price: Some(total_price),
            customer_id: Some(customer_id),
            product_id: Some(product_id),
        }
    }

    /// Check every field, reporting the first violation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if a field is absent, `total_price` is not
    /// positive, or an identifier is zero.
    pub fn validate(&self) -> Result<ValidOrder, ValidationError> {
        let total_price = self
            .total_price
            .ok_or(ValidationError::Missing("total_price"))?;
        if total_price <= 0 {
            return Err(ValidationError::NotPositive("total_price"));
        }

        let customer_id = required_id(self.customer_id, "customer_id")?;
        let product_id = required_id(self.product_id, "product_id")?;

        Ok(ValidOrder {
            total_price,
            customer_id,
            product_id,
        })
    }
}

fn required_id(value: Option<i64>, field: &'static str) -> Result<i64, ValidationError> {
    match value {
        None => Err(ValidationError::Missing(field)),
        Some(0) => Err(ValidationError::Zero(field)),
        Some(id) => Ok(id),
    }
}

/// An order that passed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidOrder {
    /// Positive order total
    pub total_price: i64,
    /// Non-zero customer id
    pub customer_id: i64,
    /// Non-zero product id
    pub product_id: i64,
}

/// Body returned for an accepted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResponse {
    /// Generated order id
    pub order_id: String,
    /// Always [`STATUS_CREATED`]
    pub status: String,
}

impl OrderResponse {
    /// Response for a freshly created order.
    #[must_use]
    pub fn created(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: STATUS_CREATED.to_string(),
        }
    }
}

/// Published once per accepted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    /// Producer-generated order id (UUID v4)
    pub order_id: String,
    /// Order total
    pub total_price: i64,
    /// Customer id
    pub customer_id: i64,
    /// Product id
    pub product_id: i64,
    /// RFC 3339 UTC timestamp, second precision, `Z` suffix
    pub created_at: String,
}

impl OrderCreatedEvent {
    /// Build the event for a validated order.
    #[must_use]
    pub fn new(order_id: impl Into<String>, order: &ValidOrder, created_at: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.into(),
            total_price: order.total_price,
            customer_id: order.customer_id,
            product_id: order.product_id,
            created_at: format_timestamp(created_at),
        }
    }
}

impl Event for OrderCreatedEvent {
    fn event_type(&self) -> &'static str {
        ORDER_CREATED
    }
}

/// Render a timestamp the way `created_at` is carried on the wire.
#[must_use]
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn complete_request_is_valid() {
        let order = OrderRequest::new(150, 7, 3).validate().unwrap();
        assert_eq!(
            order,
            ValidOrder {
                total_price: 150,
                customer_id: 7,
                product_id: 3
            }
        );
    }

    #[test]
    fn missing_fields_are_named() {
        let request = OrderRequest {
            total_price: Some(10),
            customer_id: None,
            product_id: Some(1),
        };
        let err = request.validate().unwrap_err();
        assert_eq!(err, ValidationError::Missing("customer_id"));
        assert_eq!(err.to_string(), "customer_id is required");

        let err = OrderRequest::default().validate().unwrap_err();
        assert_eq!(err.to_string(), "total_price is required");
    }

    #[test]
    fn zero_or_negative_price_is_rejected() {
        let err = OrderRequest::new(0, 7, 3).validate().unwrap_err();
        assert_eq!(err.to_string(), "total_price must be positive");

        let err = OrderRequest::new(-5, 7, 3).validate().unwrap_err();
        assert_eq!(err, ValidationError::NotPositive("total_price"));
    }

    #[test]
    fn zero_ids_are_rejected() {
        let err = OrderRequest::new(150, 0, 3).validate().unwrap_err();
        assert_eq!(err.to_string(), "customer_id must be non-zero");

        let err = OrderRequest::new(150, 7, 0).validate().unwrap_err();
        assert_eq!(err, ValidationError::Zero("product_id"));
    }

    #[test]
    fn event_wire_format() {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let order = OrderRequest::new(150, 7, 3).validate().unwrap();
        let event = OrderCreatedEvent::new("o-1", &order, created_at);

        let json: serde_json::Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "order_id": "o-1",
                "total_price": 150,
                "customer_id": 7,
                "product_id": 3,
                "created_at": "2024-01-01T12:00:00Z"
            })
        );
        assert_eq!(event.event_type(), "OrderCreated");
    }

    #[test]
    fn sub_second_precision_is_dropped() {
        let time = Utc.timestamp_opt(1_700_000_000, 987_654_321).unwrap();
        assert_eq!(format_timestamp(time), "2023-11-14T22:13:20Z");
    }
}
