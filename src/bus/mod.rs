//! Publish/subscribe channel fanning chat lines out to every server process.

mod memory;
mod redis_pubsub;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

pub use memory::MemoryBus;
pub use redis_pubsub::RedisBus;

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Broadcast bus unavailable: {0}")]
    Unavailable(String),

    #[error("Broadcast bus call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<::redis::RedisError> for BusError {
    fn from(err: ::redis::RedisError) -> Self {
        BusError::Unavailable(err.to_string())
    }
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Hand `payload` to every current subscriber of `topic`.
    /// Having no subscribers is not an error.
    async fn publish(&self, topic: &str, payload: &str) -> BusResult<()>;

    /// Payloads published on `topic` from now on, in publish order.
    /// The stream ends if the subscription is lost.
    async fn subscribe(&self, topic: &str) -> BusResult<BoxStream<'static, String>>;
}
