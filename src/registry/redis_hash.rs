use super::*;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, RedisResult};
use std::collections::HashMap;
use std::future::Future;

/// Hash holding `name -> id` for every reserved name
pub const CLIENTS_KEY: &str = "clients";

/// Registry backed by a Redis hash, shared by every server pointing at the
/// same instance. Reservation is `HSETNX`, so it is atomic on the server.
#[derive(Clone)]
pub struct RedisRegistry {
    conn: ConnectionManager,
    key: String,
    timeout: Duration,
}

impl RedisRegistry {
    /// Connect to Redis. The connection manager reconnects on its own if
    /// the store restarts later.
    pub async fn connect(url: &str, timeout: Duration) -> RegistryResult<Self> {
        let client = ::redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| RegistryError::Timeout(timeout))??;

        tracing::info!("Registry connected to {}", url);
        Ok(Self {
            conn,
            key: CLIENTS_KEY.to_string(),
            timeout,
        })
    }

    async fn bounded<T>(&self, call: impl Future<Output = RedisResult<T>>) -> RegistryResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RegistryError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl Registry for RedisRegistry {
    async fn reserve(&self, name: &str, id: &UserId) -> RegistryResult<Reservation> {
        let mut conn = self.conn.clone();
        let created: bool = self.bounded(conn.hset_nx(&self.key, name, id)).await?;
        Ok(if created {
            Reservation::Reserved
        } else {
            Reservation::Taken
        })
    }

    async fn list(&self) -> RegistryResult<Vec<(String, UserId)>> {
        let mut conn = self.conn.clone();
        let entries: HashMap<String, String> = self.bounded(conn.hgetall(&self.key)).await?;
        Ok(entries.into_iter().collect())
    }

    async fn remove(&self, name: &str) -> RegistryResult<()> {
        let mut conn = self.conn.clone();
        // HDEL on a missing field returns 0, which is fine
        let _: i64 = self.bounded(conn.hdel(&self.key, name)).await?;
        Ok(())
    }

    async fn clear(&self) -> RegistryResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self.bounded(conn.del(&self.key)).await?;
        Ok(())
    }
}
