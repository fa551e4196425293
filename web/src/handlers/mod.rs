//! HTTP handlers shared by both services.

pub mod health;

pub use health::{HealthResponse, health_check};
