//! The service stops when its consumer loop stops, and vice versa.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use order_pipeline_core::Envelope;
use order_pipeline_core::environment::SystemClock;
use order_pipeline_core::message_bus::MessageBus;
use order_pipeline_core::propagation::NoopTraceCarrier;
use order_pipeline_runtime::ConsumerExit;
use order_pipeline_testing::InMemoryMessageBus;
use order_service::ORDERS_TOPIC;
use report_service::{
    AppState, ConsumerTask, ReportHandler, ReportStore, ServiceExit, build_router,
    report_consumer, service,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};

const WAIT: Duration = Duration::from_secs(2);

async fn listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

fn app(store: Arc<ReportStore>) -> axum::Router {
    build_router(AppState::new(store), Arc::new(NoopTraceCarrier))
}

async fn start_consumer(bus: &InMemoryMessageBus, store: &Arc<ReportStore>) -> ConsumerTask {
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let handle = report_consumer(
        ORDERS_TOPIC,
        Arc::new(bus.clone()),
        Arc::new(NoopTraceCarrier),
        ReportHandler::new(Arc::clone(store), Arc::new(SystemClock)),
        shutdown_rx,
    )
    .unwrap()
    .start()
    .await
    .unwrap();

    ConsumerTask {
        handle,
        shutdown,
        shutdown_timeout: WAIT,
    }
}

#[tokio::test]
async fn closed_subscription_stops_service() {
    let bus = InMemoryMessageBus::new();
    let store = Arc::new(ReportStore::new());
    let consumer = start_consumer(&bus, &store).await;

    bus.close();
    let exit = tokio::time::timeout(
        WAIT,
        service::run(listener().await, app(store), consumer, std::future::pending::<()>()),
    )
    .await
    .expect("service should stop with its consumer")
    .unwrap();

    assert_eq!(exit, ServiceExit::ConsumerStopped(ConsumerExit::StreamEnded));
    assert!(!exit.is_clean());
}

async fn crashing_consumer() -> ConsumerExit {
    panic!("consumer crashed")
}

#[tokio::test]
async fn panicked_consumer_stops_service() {
    let store = Arc::new(ReportStore::new());
    let (shutdown, _shutdown_rx) = broadcast::channel(1);
    let consumer = ConsumerTask {
        handle: tokio::spawn(crashing_consumer()),
        shutdown,
        shutdown_timeout: WAIT,
    };

    let exit = tokio::time::timeout(
        WAIT,
        service::run(listener().await, app(store), consumer, std::future::pending::<()>()),
    )
    .await
    .expect("service should stop with its consumer")
    .unwrap();

    assert!(matches!(exit, ServiceExit::ConsumerFailed(_)));
}

#[tokio::test]
async fn shutdown_signal_stops_server_then_consumer() {
    let bus = InMemoryMessageBus::new();
    let store = Arc::new(ReportStore::new());
    let consumer = start_consumer(&bus, &store).await;
    let (signal_tx, signal_rx) = oneshot::channel::<()>();

    let running = tokio::spawn(service::run(
        listener().await,
        app(Arc::clone(&store)),
        consumer,
        async move {
            let _ = signal_rx.await;
        },
    ));

    signal_tx.send(()).unwrap();
    let exit = tokio::time::timeout(WAIT, running)
        .await
        .expect("service should stop on signal")
        .unwrap()
        .unwrap();
    assert_eq!(exit, ServiceExit::Shutdown);

    bus.publish(ORDERS_TOPIC, &Envelope::new(b"{}".to_vec()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.pending(ORDERS_TOPIC), 1);
    assert!(store.is_empty());
}
