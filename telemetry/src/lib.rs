//! # Order Pipeline Telemetry
//!
//! Tracing setup shared by both services.
//!
//! - [`init_tracing`] installs the global subscriber: env filter, fmt output
//!   (pretty or JSON) and the `tracing-opentelemetry` bridge
//! - [`ExporterConfig`] picks where spans go (nowhere, a Jaeger agent, or an
//!   OTLP/HTTP collector)
//! - [`W3cTraceCarrier`] moves trace contexts through message headers
//!
//! ## Usage
//!
//! ```ignore
//! let config = TelemetryConfig::from_env("order-service")?;
//! let _guard = order_pipeline_telemetry::init_tracing(&config)?;
//!
//! // Spans are exported until the guard is dropped
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self as sdktrace, Tracer};
use opentelemetry_sdk::{Resource, runtime};
use std::env;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub mod propagation;

pub use propagation::W3cTraceCarrier;

/// Default Jaeger agent endpoint.
pub const DEFAULT_JAEGER_ENDPOINT: &str = "localhost:6831";

/// Default OTLP/HTTP collector endpoint.
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Errors from telemetry setup.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// `TRACE_EXPORTER` named an unknown exporter
    #[error("Unknown trace exporter: {0} (expected none, jaeger or otlp)")]
    UnknownExporter(String),

    /// The exporter pipeline could not be installed
    #[error("Failed to install trace exporter: {0}")]
    Exporter(String),

    /// A global subscriber was already installed
    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Where finished spans are sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExporterConfig {
    /// Spans get real ids for propagation but are not exported
    None,
    /// Jaeger agent over UDP (e.g. `localhost:6831`)
    Jaeger {
        /// Agent `host:port`
        endpoint: String,
    },
    /// OTLP over HTTP/protobuf with batch export (e.g. `http://localhost:4318`)
    Otlp {
        /// Collector base URL
        endpoint: String,
    },
}

impl ExporterConfig {
    /// Parse an exporter name with an optional endpoint override.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::UnknownExporter`] for names other than
    /// `none`, `jaeger` and `otlp` (case-insensitive).
    pub fn parse(name: &str, endpoint: Option<String>) -> Result<Self, TelemetryError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "jaeger" => Ok(Self::Jaeger {
                endpoint: endpoint.unwrap_or_else(|| DEFAULT_JAEGER_ENDPOINT.to_string()),
            }),
            "otlp" => Ok(Self::Otlp {
                endpoint: endpoint.unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string()),
            }),
            other => Err(TelemetryError::UnknownExporter(other.to_string())),
        }
    }
}

/// Telemetry settings for one service.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute and log identity
    pub service_name: String,
    /// `service.version` resource attribute
    pub service_version: String,
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines instead of pretty text
    pub json_logs: bool,
    /// Span exporter
    pub exporter: ExporterConfig,
}

impl TelemetryConfig {
    /// Defaults for `service_name`: info level, text logs, no exporter.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: "v1.0.0".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            exporter: ExporterConfig::None,
        }
    }

    /// Load from the environment.
    ///
    /// Reads `SERVICE_NAME`, `SERVICE_VERSION`, `LOG_LEVEL`, `LOG_FORMAT`
    /// (`json` or `text`), `TRACE_EXPORTER` and `TRACE_ENDPOINT`.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::UnknownExporter`] if `TRACE_EXPORTER` is invalid.
    pub fn from_env(default_service_name: &str) -> Result<Self, TelemetryError> {
        let defaults = Self::new(default_service_name);
        let exporter = ExporterConfig::parse(
            &env::var("TRACE_EXPORTER").unwrap_or_default(),
            env::var("TRACE_ENDPOINT").ok(),
        )?;

        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: env::var("SERVICE_VERSION").unwrap_or(defaults.service_version),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logs: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            exporter,
        })
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new("service.name", self.service_name.clone()),
            KeyValue::new("service.version", self.service_version.clone()),
        ])
    }
}

/// Flushes and shuts down the tracer provider when dropped.
#[must_use = "spans stop being exported when the guard is dropped"]
pub struct TelemetryGuard {
    _private: (),
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        global::shutdown_tracer_provider();
    }
}

fn build_tracer(config: &TelemetryConfig) -> Result<Tracer, TelemetryError> {
    let trace_config = sdktrace::config().with_resource(config.resource());

    match &config.exporter {
        ExporterConfig::None => {
            let provider = sdktrace::TracerProvider::builder()
                .with_config(trace_config)
                .build();
            let tracer = provider.tracer(config.service_name.clone());
            global::set_tracer_provider(provider);
            Ok(tracer)
        },
        ExporterConfig::Jaeger { endpoint } => opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name(config.service_name.clone())
            .with_endpoint(endpoint.as_str())
            .with_trace_config(trace_config)
            .install_simple()
            .map_err(|e| TelemetryError::Exporter(e.to_string())),
        ExporterConfig::Otlp { endpoint } => opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .http()
                    .with_endpoint(endpoint.as_str()),
            )
            .with_trace_config(trace_config)
            .install_batch(runtime::Tokio)
            .map_err(|e| TelemetryError::Exporter(e.to_string())),
    }
}

/// Install the global tracing subscriber and tracer provider.
///
/// Call once at startup, inside the tokio runtime when the OTLP exporter is
/// selected. The W3C propagator becomes the global text-map propagator.
///
/// # Errors
///
/// Returns [`TelemetryError::Exporter`] if the exporter pipeline fails and
/// [`TelemetryError::Subscriber`] if a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = build_tracer(config)?;
    let guard = TelemetryGuard { _private: () };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(config.json_logs.then(|| fmt::layer().json()))
        .with((!config.json_logs).then(fmt::layer))
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        exporter = ?config.exporter,
        "Tracing initialized"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exporter_names_parse() {
        assert_eq!(ExporterConfig::parse("none", None).ok(), Some(ExporterConfig::None));
        assert_eq!(ExporterConfig::parse("", None).ok(), Some(ExporterConfig::None));
        assert_eq!(
            ExporterConfig::parse("Jaeger", None).ok(),
            Some(ExporterConfig::Jaeger {
                endpoint: DEFAULT_JAEGER_ENDPOINT.to_string()
            })
        );
        assert_eq!(
            ExporterConfig::parse("otlp", Some("http://collector:4318".to_string())).ok(),
            Some(ExporterConfig::Otlp {
                endpoint: "http://collector:4318".to_string()
            })
        );
    }

    #[test]
    fn unknown_exporter_is_rejected() {
        let result = ExporterConfig::parse("zipkin", None);
        assert!(matches!(result, Err(TelemetryError::UnknownExporter(ref name)) if name == "zipkin"));
    }

    #[test]
    fn defaults_match_service() {
        let config = TelemetryConfig::new("report-service");
        assert_eq!(config.service_name, "report-service");
        assert_eq!(config.service_version, "v1.0.0");
        assert_eq!(config.exporter, ExporterConfig::None);
        assert!(!config.json_logs);
    }
}
