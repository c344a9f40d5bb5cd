use super::*;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;

/// Capacity of each topic channel. Subscribers that fall further behind
/// skip payloads (RecvError::Lagged).
const TOPIC_CAPACITY: usize = 1024;

/// In-process bus built on `tokio::sync::broadcast`, one channel per topic
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .lock()
            .await
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, payload: &str) -> BusResult<()> {
        // send() returns Err if there are no receivers, that's fine
        let _ = self.sender(topic).await.send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> BusResult<BoxStream<'static, String>> {
        let rx = self.sender(topic).await.subscribe();
        let topic = topic.to_string();

        let stream = futures::stream::unfold((rx, topic), |(mut rx, topic)| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, (rx, topic))),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Subscriber on {} lagged, skipped {} payloads", topic, skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}
