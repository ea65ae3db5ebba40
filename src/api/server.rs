//! Runs the API as a background task.
//!
//! The task binds its own listener and reports how it ended on the exit
//! channel. The lifecycle treats any message on that channel as a request to
//! shut down, so a bind failure or a crashed server stops the process.

use std::io;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{error, info};

use super::{AppState, router};

/// Why the API task stopped.
#[derive(Debug)]
pub enum ApiExit {
    /// The listener could not be bound.
    Bind(io::Error),
    /// The server failed while serving.
    Serve(io::Error),
    /// Graceful shutdown completed.
    Stopped,
}

impl std::fmt::Display for ApiExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiExit::Bind(e) => write!(f, "bind failed: {}", e),
            ApiExit::Serve(e) => write!(f, "server error: {}", e),
            ApiExit::Stopped => f.write_str("stopped"),
        }
    }
}

/// Spawn the API server on `addr`.
///
/// The server stops gracefully once `shutdown` is cancelled. The task
/// inherits the caller's tracing subscriber.
pub fn spawn_api(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
    exit_tx: mpsc::Sender<ApiExit>,
) -> JoinHandle<()> {
    let task = async move {
        let exit = serve(addr, state, shutdown).await;
        match &exit {
            ApiExit::Stopped => info!("API server stopped"),
            other => error!("API server exited: {}", other),
        }
        // The lifecycle may already be tearing down and have dropped the receiver.
        let _ = exit_tx.send(exit).await;
    };
    tokio::spawn(task.with_current_subscriber())
}

async fn serve(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> ApiExit {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => return ApiExit::Bind(e),
    };
    let local = listener.local_addr().unwrap_or(addr);
    info!("API listening on http://{}", local);

    let app = router(state);
    match axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        Ok(()) => ApiExit::Stopped,
        Err(e) => ApiExit::Serve(e),
    }
}
