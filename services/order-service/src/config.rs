//! Configuration management for the order service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Telemetry settings (`SERVICE_NAME`, `TRACE_EXPORTER`, ...) are read
//! separately by `TelemetryConfig::from_env`.

use crate::types::ORDERS_TOPIC;
use std::env;
use std::net::SocketAddr;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Message bus configuration
    pub redpanda: RedpandaConfig,
    /// HTTP server configuration
    pub server: ServerConfig,
}

/// RedPanda/Kafka configuration
#[derive(Debug, Clone)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Topic order events are published to
    pub topic: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Prometheus scrape port; metrics are disabled when unset
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable numeric values fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            redpanda: RedpandaConfig {
                brokers: env::var("REDPANDA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                topic: env::var("ORDERS_TOPIC").unwrap_or_else(|_| ORDERS_TOPIC.to_string()),
            },
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8080),
                metrics_port: env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok()),
            },
        }
    }

    /// `host:port` the HTTP server binds to.
    #[must_use]
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Metrics listener address, if enabled.
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        let port = self.server.metrics_port?;
        format!("{}:{port}", self.server.host).parse().ok()
    }
}
