//! Connection acceptor and server lifecycle

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::fanout::spawn_fanout;
use crate::session::handle_connection;
use crate::state::AppState;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections until shutdown, one session task per connection
pub async fn accept_loop(listener: TcpListener, state: Arc<AppState>) {
    loop {
        let accepted = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::info!("New connection accepted from {}", peer);
                state
                    .sessions
                    .spawn(handle_connection(stream, peer, state.clone()));
            }
            Err(e) => {
                tracing::error!("Error accepting connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    tracing::info!("Acceptor stopped");
}

/// Run the relay until `signal` resolves, then shut down
pub async fn run(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_grace: Duration,
    signal: impl Future<Output = ()>,
) {
    let fanout = spawn_fanout(state.clone()).await;
    let acceptor = tokio::spawn(accept_loop(listener, state.clone()));

    signal.await;
    tracing::info!("Shutdown requested");

    shutdown(&state, shutdown_grace).await;

    if let Err(e) = acceptor.await {
        tracing::error!("Acceptor task failed: {}", e);
    }
    if let Err(e) = fanout.await {
        tracing::error!("Fan-out task failed: {}", e);
    }
}

/// Cancel every session, give them `grace` to release their names, then
/// reset the registry.
pub async fn shutdown(state: &AppState, grace: Duration) {
    state.shutdown.cancel();
    state.sessions.close();

    if tokio::time::timeout(grace, state.sessions.wait()).await.is_err() {
        tracing::warn!(
            "{} sessions still running after {:?}",
            state.sessions.len(),
            grace
        );
    }

    match state.registry.clear().await {
        Ok(()) => tracing::info!("Registry cleared"),
        Err(e) => tracing::error!("Failed to clear registry: {}", e),
    }
}
