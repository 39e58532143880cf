//! Entity replication over a reliable message transport, with BSP maps
//! providing potentially visible set culling.

pub mod bsp;
pub mod client;
pub mod entity;
pub mod level;
pub mod net;
pub mod props;
pub mod server;
pub mod simulation;
pub mod visibility;

pub use bsp::{Aabb, BspTree, LoadError, LoadOptions, MapEntity};
pub use client::{Client, ClientConfig, ClientEvent, ReplicationError};
pub use entity::{
    ClientBehavior, ClientEntity, ClientId, ClientRegistry, EntityId, Lifecycle, RegistryError,
    ServerBehavior, ServerEntity, ServerRegistry,
};
pub use level::{Level, LevelLoader, PhysicsBackend, SceneGraph};
pub use net::{
    ClientState, ConnectionId, Datagram, DatagramIterator, DEFAULT_PORT, DEFAULT_TICK_RATE,
    Message, MessageType, Transport, TransportEvent,
};
pub use props::{NetField, NetworkVars, PropKind, PropValue, RecvTable, SendTable};
pub use server::{DisconnectReason, Server, ServerConfig, ServerEvent};
pub use simulation::{FixedTimestep, Simulation, TickClock, TickInfo, TickPipeline};
pub use visibility::{LeafTracker, make_net_bounds};
