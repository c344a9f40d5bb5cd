use std::fmt;
use std::net::SocketAddr;

/// Opaque ID types for type safety
pub type UserId = String;
pub type ConnectionId = String;

/// Topic every chat line is published on
pub const CHAT_TOPIC: &str = "chat_messages";

/// A negotiated chat participant. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Peer address of the connection, stable for its lifetime
    pub id: UserId,
    /// Display name reserved in the registry
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.id, self.name)
    }
}

/// Derive a user ID from the connection's network endpoint
pub fn user_id_for(peer: &SocketAddr) -> UserId {
    peer.to_string()
}

/// Outcome of a name reservation that reached the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    Taken,
}

/// Why a session left the Active state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer closed the stream
    Eof,
    /// Peer sent `/exit`
    Exit,
    /// Outbound queue overflowed or a write stalled
    Evicted,
    /// Server is shutting down
    Shutdown,
    /// Read failed
    Io(String),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Eof => write!(f, "connection closed by peer"),
            SessionEnd::Exit => write!(f, "client exited"),
            SessionEnd::Evicted => write!(f, "evicted as slow consumer"),
            SessionEnd::Shutdown => write!(f, "server shutdown"),
            SessionEnd::Io(e) => write!(f, "read error: {}", e),
        }
    }
}
