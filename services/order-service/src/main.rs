//! Order service HTTP server.

use anyhow::Context;
use order_pipeline_core::environment::SystemClock;
use order_pipeline_core::message_bus::MessageBus;
use order_pipeline_core::propagation::TraceCarrier;
use order_pipeline_redpanda::RedpandaMessageBus;
use order_pipeline_runtime::MetricsServer;
use order_pipeline_telemetry::{TelemetryConfig, W3cTraceCarrier, init_tracing};
use order_pipeline_web::shutdown_signal;
use order_service::{AppState, Config, OrderProducer, build_router};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let telemetry = TelemetryConfig::from_env("order-service")?;
    let _telemetry_guard = init_tracing(&telemetry)?;

    let config = Config::from_env();
    info!(
        version = %telemetry.service_version,
        brokers = %config.redpanda.brokers,
        topic = %config.redpanda.topic,
        "Order service initializing"
    );

    let mut metrics = config.metrics_addr().map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start().context("failed to start metrics server")?;
    }

    let bus: Arc<dyn MessageBus> = Arc::new(
        RedpandaMessageBus::builder()
            .brokers(&config.redpanda.brokers)
            .build()
            .context("failed to create message bus publisher")?,
    );
    let carrier: Arc<dyn TraceCarrier> = Arc::new(W3cTraceCarrier::new());

    let producer = OrderProducer::new(bus, Arc::clone(&carrier), Arc::new(SystemClock))
        .with_topic(config.redpanda.topic.clone())
        .with_service_name(telemetry.service_name.clone());

    let app = build_router(AppState::new(producer), carrier);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Order service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Order service stopped");
    Ok(())
}
