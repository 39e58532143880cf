use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::packet::{PacketHeader, MAX_MESSAGE_SIZE};
use super::stats::NetworkStats;
use super::tracking::{AckTracker, ReceiveTracker, ReliableChannel};
use super::transport::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Client: waiting for a challenge.
    Requesting,
    /// Client: challenge answered, waiting for acceptance.
    Responding,
    /// Server: challenge sent, waiting for the response.
    Challenging,
    /// Server: handshake verified, waiting for the host to accept.
    PendingAccept,
    Connected,
}

/// Per-peer state of a UDP connection.
#[derive(Debug)]
pub struct UdpConnection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub receive_tracker: ReceiveTracker,
    pub ack_tracker: AckTracker,
    pub channel: ReliableChannel,
    pub stats: NetworkStats,
    pub last_receive_time: Instant,
    pub last_send_time: Instant,
    pub ack_owed: bool,
    send_sequence: u32,
}

impl UdpConnection {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        state: ConnectionState,
        client_salt: u64,
        server_salt: u64,
        now: Instant,
    ) -> Self {
        Self {
            id,
            addr,
            state,
            client_salt,
            server_salt,
            receive_tracker: ReceiveTracker::new(),
            ack_tracker: AckTracker::new(256),
            channel: ReliableChannel::new(MAX_MESSAGE_SIZE),
            stats: NetworkStats::default(),
            last_receive_time: now,
            last_send_time: now,
            ack_owed: false,
            send_sequence: 1,
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    /// Header for the next sequenced packet, carrying our current acks.
    pub fn next_header(&mut self) -> PacketHeader {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1).max(1);
        let (ack, ack_bitfield) = self.receive_tracker.ack_data();
        self.ack_owed = false;
        PacketHeader::new(sequence, ack, ack_bitfield)
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.duration_since(self.last_receive_time) > timeout
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_receive_time = now;
    }

    pub fn refresh_stats(&mut self) {
        self.stats.rtt_ms = self.ack_tracker.srtt();
        self.stats.rtt_variance = self.ack_tracker.rtt_var();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_sequenced_and_clear_owed_acks() {
        let now = Instant::now();
        let addr: SocketAddr = "127.0.0.1:27015".parse().unwrap();
        let mut conn = UdpConnection::new(1, addr, ConnectionState::Connected, 0xAA, 0x0F, now);
        assert_eq!(conn.combined_salt(), 0xA5);

        conn.receive_tracker.record_received(5);
        conn.ack_owed = true;

        let first = conn.next_header();
        let second = conn.next_header();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(first.ack, 5);
        assert!(!conn.ack_owed);

        assert!(!conn.is_timed_out(Duration::from_secs(1), now));
        assert!(conn.is_timed_out(Duration::from_secs(1), now + Duration::from_secs(2)));
    }
}
