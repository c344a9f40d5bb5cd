//! Name registry shared by every server process.
//!
//! The registry is the system-wide source of truth for which display names are
//! in use. Reservation is a single set-if-absent call; callers never get a
//! separate read-then-write path.

mod memory;
mod redis_hash;

use async_trait::async_trait;
use std::time::Duration;

use crate::types::{Reservation, UserId};

pub use memory::MemoryRegistry;
pub use redis_hash::RedisRegistry;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// The registry could not be reached. Distinct from a taken name.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Registry call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<::redis::RedisError> for RegistryError {
    fn from(err: ::redis::RedisError) -> Self {
        RegistryError::Unavailable(err.to_string())
    }
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Atomically map `name` to `id` if nobody holds `name` yet
    async fn reserve(&self, name: &str, id: &UserId) -> RegistryResult<Reservation>;

    /// All `(name, id)` entries, in no particular order
    async fn list(&self) -> RegistryResult<Vec<(String, UserId)>>;

    /// Release `name`. Releasing an absent name succeeds.
    async fn remove(&self, name: &str) -> RegistryResult<()>;

    /// Drop every entry
    async fn clear(&self) -> RegistryResult<()>;
}
