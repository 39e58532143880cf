use std::net::SocketAddr;

/// Handle for one peer connection, assigned by the transport.
pub type ConnectionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Handshake finished on the remote side; the host must `accept` or `close`.
    Connecting,
    Connected,
    ClosedByPeer,
    ProblemDetectedLocally,
}

impl ConnectionStatus {
    pub fn is_closed(self) -> bool {
        matches!(self, Self::ClosedByPeer | Self::ProblemDetectedLocally)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StatusChanged {
        connection: ConnectionId,
        status: ConnectionStatus,
        addr: Option<SocketAddr>,
    },
    Message {
        connection: ConnectionId,
        data: Vec<u8>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("connection {0} is not established")]
    NotConnected(ConnectionId),
    #[error("link to connection {0} is down")]
    LinkDown(ConnectionId),
    #[error("message of {0} bytes exceeds the packet budget")]
    MessageTooLarge(usize),
    #[error("packet encoding failed: {0}")]
    Encode(String),
}

/// Message-oriented, reliable and ordered connection transport.
///
/// Hosts drive it by calling `poll` once per tick; status changes and
/// messages are returned in arrival order, never from another thread.
pub trait Transport {
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Completes a connection reported as `Connecting`.
    fn accept(&mut self, connection: ConnectionId) -> Result<(), TransportError>;

    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError>;

    fn close(&mut self, connection: ConnectionId, reason: &str);
}
