//! Wire protocol: newline-delimited UTF-8 text, one message per line.
//!
//! Everything the server says to a client is built here so the session and
//! command handlers never format protocol text by hand.

use crate::types::User;

/// Marker that turns a line into a command
pub const COMMAND_MARKER: char = '/';

pub const NAME_PROMPT: &str = "Enter your name: ";
pub const NAME_TAKEN: &str = "Error: Name already taken, please choose another.";
pub const REGISTRY_UNAVAILABLE: &str = "Error: Name registry unavailable, please try again.";
pub const DELIVERY_UNCERTAIN: &str =
    "Warning: message may not have been delivered, please try again.";
pub const LINE_TOO_LONG: &str = "Error: Line too long.";
pub const EXIT_ACK: &str = "You have exited the chat.";
pub const NO_USERS_ONLINE: &str = "No users online.";
pub const ONLINE_FETCH_FAILED: &str = "Error: Could not fetch online users, please try again.";
pub const UNKNOWN_COMMAND: &str = "Unknown command.";

const WELCOME_PREFIX: &str = "Welcome, ";

/// Commands a client can issue once Active
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Online,
    Exit,
    Unknown(String),
}

impl Command {
    /// Parse a command line. Returns `None` for lines without the marker.
    /// Only the first word is significant.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with(COMMAND_MARKER) {
            return None;
        }
        let word = line.split_whitespace().next().unwrap_or(line);
        Some(match word {
            "/online" => Command::Online,
            "/exit" => Command::Exit,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// `Welcome, <name>!-<id>`
pub fn welcome(user: &User) -> String {
    format!("{}{}!-{}", WELCOME_PREFIX, user.name, user.id)
}

/// `Error: Invalid name, ...` for names that fail validation
pub fn invalid_name(max_len: usize) -> String {
    format!(
        "Error: Invalid name, use up to {} characters without spaces.",
        max_len
    )
}

/// Addressed chat line: `<id>-<name>: <content>`
pub fn chat_line(user: &User, content: &str) -> String {
    format!("{}: {}", user, content)
}

/// `Online users: alice bob`
pub fn online_users<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.into_iter().collect();
    if names.is_empty() {
        NO_USERS_ONLINE.to_string()
    } else {
        format!("Online users: {}", names.join(" "))
    }
}

/// Check a proposed display name. Empty names are handled by the caller.
pub fn is_valid_name(name: &str, max_len: usize) -> bool {
    !name.is_empty()
        && name.chars().count() <= max_len
        && !name.chars().any(char::is_whitespace)
}

/// Client side: pull the assigned id out of a welcome line
pub fn parse_welcome(line: &str) -> Option<&str> {
    let rest = line.trim_end().strip_prefix(WELCOME_PREFIX)?;
    let (_, id) = rest.split_once("!-")?;
    (!id.is_empty()).then_some(id)
}

/// Client side: true if a broadcast line was sent by `own_id`.
/// Clients render their own input locally and drop the echo.
pub fn is_own_echo(line: &str, own_id: &str) -> bool {
    line.strip_prefix(own_id)
        .is_some_and(|rest| rest.starts_with('-'))
}
