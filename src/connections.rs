//! Local connection table and per-connection outbound queues.
//!
//! Every negotiated connection owns a bounded queue drained by its own writer
//! task. The fan-out consumer only ever does a non-blocking `try_send` into
//! those queues, so one stalled socket cannot hold up delivery to the rest.
//! A connection whose queue is full is evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::types::{ConnectionId, User};

/// A line queued for a client, without its trailing newline
pub type Outbound = Arc<str>;

/// Delivery handle for one negotiated connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user: User,
    outbox: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(user: User, outbox: mpsc::Sender<Outbound>, cancel: CancellationToken) -> Self {
        Self {
            user,
            outbox,
            cancel,
        }
    }
}

/// Result of one fan-out pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub evicted: Vec<User>,
}

/// Process-local map of open connections. The lock is only held for
/// insert/remove/iterate, never across a socket write.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTable {
    inner: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: ConnectionId, handle: ConnectionHandle) {
        self.inner.write().await.insert(id, handle);
    }

    /// Insert an entry and queue its first line under the same lock, so no
    /// broadcast overtakes the greeting and none is missed right after it.
    /// Returns the greeting if the queue had no room for it.
    pub async fn admit(
        &self,
        id: ConnectionId,
        handle: ConnectionHandle,
        greeting: Outbound,
    ) -> Option<Outbound> {
        let mut connections = self.inner.write().await;
        let leftover = handle.outbox.try_send(greeting).err().map(|e| e.into_inner());
        connections.insert(id, handle);
        leftover
    }

    /// Remove an entry, returning its user if it was still present
    pub async fn remove(&self, id: &str) -> Option<User> {
        self.inner.write().await.remove(id).map(|handle| handle.user)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Queue `payload` on every connection. Connections whose queue is full
    /// or closed are removed and cancelled once the lock is released.
    pub async fn deliver(&self, payload: &str) -> DeliveryReport {
        let line: Outbound = Arc::from(payload.trim_end_matches(['\r', '\n']));
        let mut report = DeliveryReport::default();
        let mut overflowed = Vec::new();

        {
            let connections = self.inner.read().await;
            for (id, handle) in connections.iter() {
                match handle.outbox.try_send(line.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Outbound queue full for {}, evicting", handle.user);
                        overflowed.push(id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!("Outbound queue closed for {}", handle.user);
                        overflowed.push(id.clone());
                    }
                }
            }
        }

        if !overflowed.is_empty() {
            let mut connections = self.inner.write().await;
            for id in overflowed {
                if let Some(handle) = connections.remove(&id) {
                    handle.cancel.cancel();
                    report.evicted.push(handle.user);
                }
            }
        }

        report
    }
}

/// Spawn the task that owns a connection's write half. Lines are written one
/// at a time, each bounded by `write_timeout`. A failed or stalled write, or
/// cancellation, stops the writer and cancels the connection. The writer
/// finishes by shutting down the write half once every sender is dropped.
pub fn spawn_writer<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    write_timeout: Duration,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            let mut buf = Vec::with_capacity(line.len() + 1);
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');

            let written = tokio::select! {
                _ = cancel.cancelled() => break,
                written = tokio::time::timeout(write_timeout, writer.write_all(&buf)) => written,
            };

            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!("Write failed: {}", e);
                    cancel.cancel();
                    break;
                }
                Err(_) => {
                    tracing::warn!("Write stalled for {:?}, dropping connection", write_timeout);
                    cancel.cancel();
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
    })
}
