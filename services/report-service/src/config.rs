//! Configuration management for the report service.
//!
//! Loads configuration from environment variables with sensible defaults.

use order_service::ORDERS_TOPIC;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

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
    /// Topic to consume order events from
    pub topic: String,
    /// Consumer group; committed offsets survive restarts
    pub consumer_group: String,
    /// Where a new group starts reading: `earliest` or `latest`
    pub auto_offset_reset: String,
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
    /// Seconds to wait for the consumer to stop during shutdown
    pub shutdown_timeout: u64,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            redpanda: RedpandaConfig {
                brokers: env::var("REDPANDA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                topic: env::var("ORDERS_TOPIC").unwrap_or_else(|_| ORDERS_TOPIC.to_string()),
                consumer_group: env::var("CONSUMER_GROUP")
                    .unwrap_or_else(|_| "report-service".to_string()),
                auto_offset_reset: env::var("AUTO_OFFSET_RESET")
                    .unwrap_or_else(|_| "earliest".to_string()),
            },
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8081),
                metrics_port: env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok()),
                shutdown_timeout: env::var("SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
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

    /// How long shutdown waits for the consumer loop.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }
}
