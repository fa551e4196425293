//! Supervision of the HTTP server and the consumer loop.
//!
//! The service is only useful while both halves run. [`run`] serves HTTP
//! until either a shutdown signal arrives or the consumer task ends on its
//! own:
//!
//! ```text
//! signal        ─► stop HTTP ─► broadcast shutdown ─► await consumer ─► Shutdown
//! consumer ends ─► stop HTTP                                        ─► ConsumerStopped / ConsumerFailed
//! ```

use anyhow::Context;
use axum::Router;
use order_pipeline_runtime::ConsumerExit;
use order_pipeline_web::await_task;
use std::future::{Future, IntoFuture};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

const CONSUMER_TASK: &str = "report-consumer";

/// How the service stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceExit {
    /// A shutdown signal stopped the server, then the consumer
    Shutdown,
    /// The consumer loop returned while the server was still running
    ConsumerStopped(ConsumerExit),
    /// The consumer task panicked or was cancelled
    ConsumerFailed(String),
}

impl ServiceExit {
    /// Whether the process should exit successfully.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

/// Handles the running service needs to stop its consumer.
pub struct ConsumerTask {
    /// The spawned consumer loop
    pub handle: JoinHandle<ConsumerExit>,
    /// Sender half of the consumer's shutdown channel
    pub shutdown: broadcast::Sender<()>,
    /// How long to wait for the consumer after signalling shutdown
    pub shutdown_timeout: Duration,
}

/// Serve `app` on `listener` until `signal` resolves or the consumer ends.
///
/// # Errors
///
/// Returns an error if the HTTP server fails.
pub async fn run<F>(
    listener: TcpListener,
    app: Router,
    consumer: ConsumerTask,
    signal: F,
) -> anyhow::Result<ServiceExit>
where
    F: Future<Output = ()> + Send + 'static,
{
    let ConsumerTask {
        mut handle,
        shutdown,
        shutdown_timeout,
    } = consumer;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = signal => {},
                _ = stop_rx => {},
            }
        })
        .into_future();
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.context("HTTP server error")?;
            info!("HTTP server stopped, stopping consumer");
            let _ = shutdown.send(());
            await_task(CONSUMER_TASK, handle, shutdown_timeout).await;
            Ok(ServiceExit::Shutdown)
        }
        joined = &mut handle => {
            let exit = match joined {
                Ok(exit) => ServiceExit::ConsumerStopped(exit),
                Err(e) => ServiceExit::ConsumerFailed(e.to_string()),
            };
            error!(?exit, "Consumer loop ended unexpectedly, stopping HTTP server");
            let _ = stop_tx.send(());
            server.await.context("HTTP server error")?;
            Ok(exit)
        }
    }
}
