//! Receiving side of entity replication.

mod config;
mod engine;
mod events;

pub use config::ClientConfig;
pub use engine::{Client, ReplicationError};
pub use events::ClientEvent;
