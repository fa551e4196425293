//! Process lifecycle helpers.
//!
//! Both services run the same shutdown sequence:
//!
//! 1. [`shutdown_signal`] resolves on Ctrl+C or SIGTERM
//! 2. The HTTP server stops accepting connections
//! 3. Background tasks are told to stop and awaited with [`await_task`]

use std::fmt::Debug;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a signal handler cannot be installed the error is logged and that
/// source never fires.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Wait up to `timeout` for a background task and log how it ended.
///
/// Returns the task's output if it finished in time.
pub async fn await_task<T: Debug>(
    name: &str,
    handle: JoinHandle<T>,
    timeout: Duration,
) -> Option<T> {
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(output)) => {
            info!(task = name, ?output, "Task stopped gracefully");
            Some(output)
        },
        Ok(Err(e)) => {
            warn!(task = name, error = %e, "Task failed");
            None
        },
        Err(_) => {
            warn!(task = name, timeout_secs = timeout.as_secs(), "Task shutdown timed out");
            None
        },
    }
}
