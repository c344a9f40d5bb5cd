//! Slash-command dispatch for Active sessions

use crate::protocol::{self, Command};
use crate::state::AppState;

/// What the session does after replying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Reply line plus the follow-up for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub line: String,
    pub flow: Flow,
}

impl CommandReply {
    fn reply(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            flow: Flow::Continue,
        }
    }
}

pub async fn dispatch(command: Command, state: &AppState) -> CommandReply {
    match command {
        Command::Online => handle_online(state).await,
        Command::Exit => CommandReply {
            line: protocol::EXIT_ACK.to_string(),
            flow: Flow::Exit,
        },
        Command::Unknown(name) => {
            tracing::debug!("Unknown command: {}", name);
            CommandReply::reply(protocol::UNKNOWN_COMMAND)
        }
    }
}

async fn handle_online(state: &AppState) -> CommandReply {
    match state.registry.list().await {
        Ok(mut entries) => {
            entries.sort();
            CommandReply::reply(protocol::online_users(
                entries.iter().map(|(name, _)| name.as_str()),
            ))
        }
        Err(e) => {
            tracing::warn!("Failed to list online users: {}", e);
            CommandReply::reply(protocol::ONLINE_FETCH_FAILED)
        }
    }
}
