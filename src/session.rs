//! Per-connection session handler.
//!
//! A session starts in AwaitingName, moves to Active once the registry
//! reserves its name, and ends Terminated. Termination always releases the
//! local table entry and the registry name, whatever ended the session.

use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::codec::{Frame, LineCodec};
use crate::commands::{self, Flow};
use crate::connections::{spawn_writer, ConnectionHandle, Outbound};
use crate::protocol::{self, Command};
use crate::state::AppState;
use crate::types::{user_id_for, ConnectionId, Reservation, SessionEnd, User, UserId, CHAT_TOPIC};

/// Attempts at releasing a name before giving up on it
const RELEASE_ATTEMPTS: u32 = 3;
const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Run a session over an accepted TCP connection
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let (reader, writer) = stream.into_split();
    let end = run_session(reader, writer, user_id_for(&peer), state).await;

    match end {
        SessionEnd::Io(_) | SessionEnd::Evicted => {
            tracing::warn!("Session {} ended: {}", peer, end)
        }
        _ => tracing::info!("Session {} ended: {}", peer, end),
    }
}

/// Drive one session to completion over any byte stream halves
pub async fn run_session<R, W>(
    reader: R,
    writer: W,
    user_id: UserId,
    state: Arc<AppState>,
) -> SessionEnd
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let cancel = state.shutdown.child_token();
    let (outbox, rx) = mpsc::channel(state.config.outbound_queue);
    let writer_task = spawn_writer(writer, rx, cancel.clone(), state.config.write_timeout);
    let lines = FramedRead::new(reader, LineCodec::new(state.config.max_line_len));

    let mut session = Session {
        conn_id: ulid::Ulid::new().to_string(),
        user_id,
        state,
        outbox,
        cancel,
        lines,
    };

    let end = match session.negotiate().await {
        Ok(user) => {
            let end = session.run_active(&user).await;
            session.release(&user).await;
            end
        }
        Err(end) => end,
    };

    session.close(writer_task).await;
    end
}

struct Session<R> {
    conn_id: ConnectionId,
    user_id: UserId,
    state: Arc<AppState>,
    outbox: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    lines: FramedRead<R, LineCodec>,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Queue a direct reply. If the writer is gone the read side notices
    /// through cancellation, so the error is dropped here.
    async fn reply(&self, line: impl Into<Outbound>) {
        let _ = self.outbox.send(line.into()).await;
    }

    /// Next trimmed line from the peer. Malformed and over-long lines come
    /// back empty, so both states treat them like a blank line.
    async fn next_line(&mut self) -> Result<String, SessionEnd> {
        let next = tokio::select! {
            _ = self.cancel.cancelled() => None,
            next = self.lines.next() => Some(next),
        };

        match next {
            None if self.state.shutdown.is_cancelled() => Err(SessionEnd::Shutdown),
            None => Err(SessionEnd::Evicted),
            Some(Some(Ok(Frame::Line(line)))) => Ok(line.trim().to_string()),
            Some(Some(Ok(Frame::Malformed))) => {
                tracing::debug!("Ignoring non UTF-8 line from {}", self.user_id);
                Ok(String::new())
            }
            Some(Some(Ok(Frame::TooLong))) => {
                tracing::debug!("Discarded over-long line from {}", self.user_id);
                self.reply(protocol::LINE_TOO_LONG).await;
                Ok(String::new())
            }
            Some(Some(Err(e))) => Err(SessionEnd::Io(e.to_string())),
            Some(None) => Err(SessionEnd::Eof),
        }
    }

    /// AwaitingName: loop until the registry reserves a name for us
    async fn negotiate(&mut self) -> Result<User, SessionEnd> {
        let max_name_len = self.state.config.max_name_len;

        loop {
            self.reply(protocol::NAME_PROMPT).await;
            let name = self.next_line().await?;

            if name.is_empty() {
                continue;
            }
            if !protocol::is_valid_name(&name, max_name_len) {
                self.reply(protocol::invalid_name(max_name_len)).await;
                continue;
            }

            match self.state.registry.reserve(&name, &self.user_id).await {
                Ok(Reservation::Reserved) => {
                    let user = User::new(self.user_id.clone(), name);
                    let handle =
                        ConnectionHandle::new(user.clone(), self.outbox.clone(), self.cancel.clone());
                    let greeting: Outbound = protocol::welcome(&user).into();

                    if let Some(greeting) = self
                        .state
                        .connections
                        .admit(self.conn_id.clone(), handle, greeting)
                        .await
                    {
                        self.reply(greeting).await;
                    }

                    tracing::info!("{} joined as {}", user.id, user.name);
                    return Ok(user);
                }
                Ok(Reservation::Taken) => {
                    tracing::debug!("{} asked for taken name {}", self.user_id, name);
                    self.reply(protocol::NAME_TAKEN).await;
                }
                Err(e) => {
                    tracing::warn!("Could not reserve {} for {}: {}", name, self.user_id, e);
                    self.reply(protocol::REGISTRY_UNAVAILABLE).await;
                }
            }
        }
    }

    /// Active: publish chat lines, dispatch commands
    async fn run_active(&mut self, user: &User) -> SessionEnd {
        loop {
            let line = match self.next_line().await {
                Ok(line) => line,
                Err(end) => return end,
            };

            // Empty lines are ignored
            if line.is_empty() {
                continue;
            }

            match Command::parse(&line) {
                Some(command) => {
                    let reply = commands::dispatch(command, &self.state).await;
                    self.reply(reply.line).await;
                    if reply.flow == Flow::Exit {
                        return SessionEnd::Exit;
                    }
                }
                None => self.publish(user, &line).await,
            }
        }
    }

    async fn publish(&self, user: &User, content: &str) {
        let payload = protocol::chat_line(user, content);
        if let Err(e) = self.state.bus.publish(CHAT_TOPIC, &payload).await {
            tracing::warn!("Failed to publish message from {}: {}", user, e);
            self.reply(protocol::DELIVERY_UNCERTAIN).await;
        }
    }

    /// Terminated: drop the table entry and release the name. The registry
    /// call does not depend on the socket still being usable.
    async fn release(&self, user: &User) {
        self.state.connections.remove(&self.conn_id).await;

        for attempt in 1..=RELEASE_ATTEMPTS {
            match self.state.registry.remove(&user.name).await {
                Ok(()) => {
                    tracing::info!("{} left, released name {}", user.id, user.name);
                    return;
                }
                Err(e) if attempt < RELEASE_ATTEMPTS => {
                    tracing::warn!(
                        "Failed to release name {} (attempt {}): {}",
                        user.name,
                        attempt,
                        e
                    );
                    tokio::time::sleep(RELEASE_RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!("Giving up releasing name {}: {}", user.name, e);
                }
            }
        }
    }

    /// Close the outbound queue and give the writer a bounded window to
    /// flush what is left (e.g. the exit acknowledgement).
    async fn close(self, writer_task: JoinHandle<()>) {
        let Session {
            outbox,
            cancel,
            state,
            ..
        } = self;
        drop(outbox);

        if tokio::time::timeout(state.config.write_timeout, writer_task)
            .await
            .is_err()
        {
            tracing::debug!("Writer did not finish in time, cancelling");
        }
        cancel.cancel();
    }
}
