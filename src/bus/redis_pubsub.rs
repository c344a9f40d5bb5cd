use super::*;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use futures::StreamExt;

/// Bus backed by Redis PUBLISH/SUBSCRIBE. Publishing shares one managed
/// connection; each subscription opens its own pub/sub connection.
#[derive(Clone)]
pub struct RedisBus {
    client: ::redis::Client,
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisBus {
    pub async fn connect(url: &str, timeout: Duration) -> BusResult<Self> {
        let client = ::redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| BusError::Timeout(timeout))??;

        tracing::info!("Broadcast bus connected to {}", url);
        Ok(Self {
            client,
            conn,
            timeout,
        })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: &str, payload: &str) -> BusResult<()> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.timeout, conn.publish::<_, _, i64>(topic, payload)).await {
            Ok(Ok(receivers)) => {
                tracing::trace!("Published to {} ({} receivers)", topic, receivers);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BusError::Timeout(self.timeout)),
        }
    }

    async fn subscribe(&self, topic: &str) -> BusResult<BoxStream<'static, String>> {
        let mut pubsub = tokio::time::timeout(self.timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| BusError::Timeout(self.timeout))??;

        tokio::time::timeout(self.timeout, pubsub.subscribe(topic))
            .await
            .map_err(|_| BusError::Timeout(self.timeout))??;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!("Dropping undecodable payload on {}: {}", msg.get_channel_name(), e);
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}
