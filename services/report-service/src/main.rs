//! Report service: consumer loop plus HTTP server.

use anyhow::Context;
use order_pipeline_core::environment::SystemClock;
use order_pipeline_core::message_bus::MessageBus;
use order_pipeline_core::propagation::TraceCarrier;
use order_pipeline_redpanda::RedpandaMessageBus;
use order_pipeline_runtime::MetricsServer;
use order_pipeline_telemetry::{TelemetryConfig, W3cTraceCarrier, init_tracing};
use order_pipeline_web::shutdown_signal;
use report_service::{
    AppState, Config, ConsumerTask, ReportHandler, ReportStore, build_router, report_consumer,
    service,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let telemetry = TelemetryConfig::from_env("report-service")?;
    let _telemetry_guard = init_tracing(&telemetry)?;

    let config = Config::from_env();
    info!(
        version = %telemetry.service_version,
        brokers = %config.redpanda.brokers,
        topic = %config.redpanda.topic,
        consumer_group = %config.redpanda.consumer_group,
        "Report service initializing"
    );

    let mut metrics = config.metrics_addr().map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start().context("failed to start metrics server")?;
    }

    let bus: Arc<dyn MessageBus> = Arc::new(
        RedpandaMessageBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .auto_offset_reset(&config.redpanda.auto_offset_reset)
            .build()
            .context("failed to create message bus subscriber")?,
    );
    let carrier: Arc<dyn TraceCarrier> = Arc::new(W3cTraceCarrier::new());
    let store = Arc::new(ReportStore::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let consumer = report_consumer(
        config.redpanda.topic.clone(),
        bus,
        Arc::clone(&carrier),
        ReportHandler::new(Arc::clone(&store), Arc::new(SystemClock)),
        shutdown_rx,
    )?;
    let consumer_handle = consumer
        .start()
        .await
        .context("failed to subscribe to orders topic")?;

    let app = build_router(AppState::new(store), carrier);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Report service listening");

    let consumer = ConsumerTask {
        handle: consumer_handle,
        shutdown: shutdown_tx,
        shutdown_timeout: config.shutdown_timeout(),
    };
    let exit = service::run(listener, app, consumer, shutdown_signal()).await?;

    if !exit.is_clean() {
        error!(?exit, "Report service stopped without its consumer");
        anyhow::bail!("consumer loop ended: {exit:?}");
    }
    info!("Report service stopped");
    Ok(())
}
