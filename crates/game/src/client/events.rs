use crate::entity::ClientId;

use super::engine::ReplicationError;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server assigned an id and named the current map.
    Connected { client_id: ClientId, map: String },
    ChangeLevel { map: String, is_transition: bool },
    Tick { tick: i32, interval_per_tick: f32 },
    /// A snapshot was cut short; entities decoded before the failure remain.
    SnapshotRejected(ReplicationError),
    Disconnected { reason: String },
}
