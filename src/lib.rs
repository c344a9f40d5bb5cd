// Public API for integration tests and potential library usage

pub mod bus;
pub mod codec;
pub mod commands;
pub mod config;
pub mod connections;
pub mod fanout;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;
pub mod types;
