use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bus::{Bus, MemoryBus};
use crate::config::SessionConfig;
use crate::connections::ConnectionTable;
use crate::registry::{MemoryRegistry, Registry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn Registry>,
    pub bus: Arc<dyn Bus>,
    pub connections: ConnectionTable,
    pub config: SessionConfig,
    /// Cancelled once on shutdown; every session holds a child token
    pub shutdown: CancellationToken,
    /// Running session tasks, drained on shutdown
    pub sessions: TaskTracker,
}

impl AppState {
    pub fn new(registry: Arc<dyn Registry>, bus: Arc<dyn Bus>, config: SessionConfig) -> Self {
        Self {
            registry,
            bus,
            connections: ConnectionTable::new(),
            config,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Single-process state with in-memory registry and bus
    pub fn in_memory(config: SessionConfig) -> Self {
        Self::new(
            Arc::new(MemoryRegistry::new()),
            Arc::new(MemoryBus::new()),
            config,
        )
    }
}
