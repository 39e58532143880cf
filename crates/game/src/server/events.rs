use crate::entity::{ClientId, EntityId};
use crate::net::{ClientState, ConnectionId};

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected {
        client_id: ClientId,
        connection: ConnectionId,
        entity_id: Option<EntityId>,
    },
    ClientStateChanged {
        client_id: ClientId,
        state: ClientState,
    },
    ClientDisconnected {
        client_id: ClientId,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        connection: ConnectionId,
        reason: String,
    },
    Command {
        client_id: ClientId,
        command: String,
    },
    LevelChanged {
        map: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    ConnectionLost,
    Kicked,
    ProtocolViolation,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::ProtocolViolation => "protocol violation",
        }
    }
}
