mod connection;
mod datagram;
mod endpoint;
mod loopback;
mod packet;
mod protocol;
mod stats;
mod tracking;
mod transport;

pub use connection::{ConnectionState, UdpConnection};
pub use datagram::{Datagram, DatagramError, DatagramIterator};
pub use endpoint::{UdpConfig, UdpTransport};
pub use loopback::{LoopbackClient, LoopbackHub, LoopbackServer};
pub use packet::{
    sequence_greater_than, Packet, PacketError, PacketHeader, PacketType, MAX_MESSAGE_SIZE,
    MAX_PACKET_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
pub use protocol::{
    begin_message, read_message_type, ClientState, Message, MessageType, ProtocolError,
    DEFAULT_PORT, DEFAULT_TICK_RATE,
};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use tracking::{AckTracker, DueChunk, ReceiveTracker, ReliableChannel};
pub use transport::{ConnectionId, ConnectionStatus, Transport, TransportError, TransportEvent};
