use futures::stream::BoxStream;
use futures::StreamExt;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::state::AppState;
use crate::types::CHAT_TOPIC;

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Subscribe to the chat topic and spawn the background task delivering every
/// payload to the local connection table. The first subscription is made
/// before returning so nothing published afterwards is missed; if it fails
/// the task keeps retrying with back-off.
pub async fn spawn_fanout(state: Arc<AppState>) -> JoinHandle<()> {
    let initial = match state.bus.subscribe(CHAT_TOPIC).await {
        Ok(stream) => {
            tracing::info!("Fan-out subscribed to {}", CHAT_TOPIC);
            Some(stream)
        }
        Err(e) => {
            tracing::error!("Fan-out failed to subscribe to {}: {}", CHAT_TOPIC, e);
            None
        }
    };

    tokio::spawn(run_fanout(state, initial))
}

async fn run_fanout(state: Arc<AppState>, mut subscription: Option<BoxStream<'static, String>>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if let Some(stream) = subscription.take() {
            backoff = INITIAL_BACKOFF;
            if !consume(&state, stream).await {
                return;
            }
            tracing::warn!("Fan-out lost its subscription to {}", CHAT_TOPIC);
        }

        let delay = with_jitter(backoff);
        tokio::select! {
            _ = state.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);

        let attempt = tokio::select! {
            _ = state.shutdown.cancelled() => return,
            attempt = state.bus.subscribe(CHAT_TOPIC) => attempt,
        };
        match attempt {
            Ok(stream) => {
                tracing::info!("Fan-out re-subscribed to {}", CHAT_TOPIC);
                subscription = Some(stream);
            }
            Err(e) => {
                tracing::error!("Fan-out failed to subscribe to {}: {}", CHAT_TOPIC, e);
            }
        }
    }
}

/// Deliver payloads until the stream ends (`true`) or shutdown (`false`)
async fn consume(state: &AppState, mut stream: BoxStream<'static, String>) -> bool {
    loop {
        let payload = tokio::select! {
            _ = state.shutdown.cancelled() => return false,
            payload = stream.next() => payload,
        };

        let Some(payload) = payload else {
            return true;
        };

        let report = state.connections.deliver(&payload).await;
        tracing::trace!("Delivered to {} connections", report.delivered);
        for user in report.evicted {
            tracing::warn!("Evicted slow consumer {}", user);
        }
    }
}

fn with_jitter(base: Duration) -> Duration {
    let jitter = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
    base + Duration::from_millis(jitter)
}
