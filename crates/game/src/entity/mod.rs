//! Entity model shared by the server and client replication engines.

pub mod base;
mod client;
mod ids;
mod server;

pub use client::{BaseEntityView, ClientBehavior, ClientEntity, ClientRegistry};
pub use ids::{
    ClientId, EntityId, IdAllocator, MAX_CLIENT_ID, MAX_ENTITY_ID, MIN_CLIENT_ID, MIN_ENTITY_ID,
};
pub use server::{BaseEntityBehavior, ServerBehavior, ServerEntity, ServerRegistry};

use crate::props::SchemaError;

/// `Constructed → Initialized → Spawned → Despawned`; construction and
/// initialization happen together in the registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Initialized,
    Spawned,
    Despawned,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("network class '{0}' is already registered")]
    DuplicateClass(String),
    #[error("no entity class registered for network name '{0}'")]
    UnknownNetworkClass(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
