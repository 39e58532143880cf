//! Authoritative side of entity replication.

mod config;
mod engine;
mod events;

pub use config::ServerConfig;
pub use engine::{ClientRecord, CommandHandler, Server, ServerError};
pub use events::{DisconnectReason, ServerEvent};
