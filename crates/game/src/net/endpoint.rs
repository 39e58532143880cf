use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::connection::{ConnectionState, UdpConnection};
use super::packet::{Packet, PacketHeader, PacketType, MAX_PACKET_SIZE};
use super::stats::{rand_u64, NetworkStats, PacketLossSimulation};
use super::transport::{ConnectionId, ConnectionStatus, Transport, TransportError, TransportEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    pub timeout: Duration,
    pub keepalive_interval: Duration,
    pub handshake_interval: Duration,
    pub min_resend: Duration,
    pub max_connections: usize,
    pub packet_loss: PacketLossSimulation,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_millis(250),
            handshake_interval: Duration::from_millis(250),
            min_resend: Duration::from_millis(100),
            max_connections: 64,
            packet_loss: PacketLossSimulation::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Server,
    Client,
}

/// `Transport` over one non-blocking UDP socket.
///
/// Connections are established with a salted challenge handshake. Game
/// messages travel as reliable, ordered chunks acknowledged through the
/// packet header ack window.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    role: Role,
    config: UdpConfig,
    connections: HashMap<ConnectionId, UdpConnection>,
    by_addr: HashMap<SocketAddr, ConnectionId>,
    next_connection: ConnectionId,
    events: Vec<TransportEvent>,
    last_handshake: Instant,
    recv_buffer: [u8; MAX_PACKET_SIZE],
    stats: NetworkStats,
}

impl UdpTransport {
    fn bind<A: ToSocketAddrs>(addr: A, role: Role, config: UdpConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            role,
            config,
            connections: HashMap::new(),
            by_addr: HashMap::new(),
            next_connection: 0,
            events: Vec::new(),
            last_handshake: Instant::now(),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
            stats: NetworkStats::default(),
        })
    }

    pub fn listen<A: ToSocketAddrs>(addr: A, config: UdpConfig) -> io::Result<Self> {
        let transport = Self::bind(addr, Role::Server, config)?;
        log::info!("Listening on {}", transport.local_addr);
        Ok(transport)
    }

    /// Starts a handshake with `server`; completion is reported by `poll`.
    pub fn connect<A: ToSocketAddrs>(
        server: A,
        config: UdpConfig,
    ) -> io::Result<(Self, ConnectionId)> {
        let server_addr = server.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "server address did not resolve")
        })?;
        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let mut transport = Self::bind(bind_addr, Role::Client, config)?;
        let now = Instant::now();
        let id = transport.allocate_id();
        let conn = UdpConnection::new(
            id,
            server_addr,
            ConnectionState::Requesting,
            rand_u64(),
            0,
            now,
        );
        let request = PacketType::ConnectionRequest {
            client_salt: conn.client_salt,
        };
        transport.insert(conn);
        transport.send_unsequenced(server_addr, request);
        log::info!("Connecting to {server_addr}");
        Ok((transport, id))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Socket-level totals plus RTT of the first connection.
    pub fn stats(&self) -> NetworkStats {
        let mut stats = self.stats.clone();
        for conn in self.connections.values() {
            stats.messages_resent += conn.stats.messages_resent;
        }
        if let Some(conn) = self.connections.values().next() {
            stats.rtt_ms = conn.stats.rtt_ms;
            stats.rtt_variance = conn.stats.rtt_variance;
        }
        stats
    }

    pub fn connection_stats(&self, connection: ConnectionId) -> Option<&NetworkStats> {
        self.connections.get(&connection).map(|conn| &conn.stats)
    }

    pub fn set_packet_loss(&mut self, simulation: PacketLossSimulation) {
        self.config.packet_loss = simulation;
    }

    fn allocate_id(&mut self) -> ConnectionId {
        self.next_connection = self.next_connection.wrapping_add(1).max(1);
        self.next_connection
    }

    fn insert(&mut self, conn: UdpConnection) {
        self.by_addr.insert(conn.addr, conn.id);
        self.connections.insert(conn.id, conn);
    }

    fn remove(&mut self, id: ConnectionId) -> Option<UdpConnection> {
        let conn = self.connections.remove(&id)?;
        self.by_addr.remove(&conn.addr);
        Some(conn)
    }

    fn push_status(&mut self, connection: ConnectionId, status: ConnectionStatus, addr: SocketAddr) {
        self.events.push(TransportEvent::StatusChanged {
            connection,
            status,
            addr: Some(addr),
        });
    }

    fn write_packet(
        socket: &UdpSocket,
        stats: &mut NetworkStats,
        loss: &PacketLossSimulation,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), TransportError> {
        let data = packet
            .serialize()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        if data.len() > MAX_PACKET_SIZE {
            return Err(TransportError::MessageTooLarge(data.len()));
        }
        if loss.should_drop() {
            stats.packets_dropped += 1;
            return Ok(());
        }

        let bytes = socket.send_to(&data, addr)?;
        stats.packets_sent += 1;
        stats.bytes_sent += bytes as u64;
        Ok(())
    }

    /// Handshake and teardown packets carry no sequence or acks.
    fn send_unsequenced(&mut self, addr: SocketAddr, payload: PacketType) {
        let packet = Packet::new(PacketHeader::new(0, 0, 0), payload);
        if let Err(e) = Self::write_packet(
            &self.socket,
            &mut self.stats,
            &self.config.packet_loss,
            &packet,
            addr,
        ) {
            log::warn!("Failed to send handshake packet to {addr}: {e}");
        }
    }

    fn send_sequenced(
        &mut self,
        id: ConnectionId,
        payload: PacketType,
        chunk: Option<u32>,
        now: Instant,
    ) -> Result<(), TransportError> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(TransportError::UnknownConnection(id))?;
        let header = conn.next_header();
        conn.ack_tracker.track_packet(header.sequence, chunk, now);
        conn.last_send_time = now;
        let packet = Packet::new(header, payload);
        Self::write_packet(
            &self.socket,
            &mut self.stats,
            &self.config.packet_loss,
            &packet,
            conn.addr,
        )
    }

    /// Sends every chunk that is new or due for a resend.
    fn flush(&mut self, id: ConnectionId, now: Instant) -> Result<(), TransportError> {
        let Some(conn) = self.connections.get_mut(&id) else {
            return Err(TransportError::UnknownConnection(id));
        };
        let resend_after = conn.ack_tracker.resend_timeout(self.config.min_resend);
        let due = conn.channel.due(now, resend_after);
        conn.stats.messages_resent += due.iter().filter(|c| c.resend).count() as u64;

        for chunk in due {
            self.send_sequenced(
                id,
                PacketType::Message {
                    message_id: chunk.chunk,
                    last: chunk.last,
                    data: chunk.data,
                },
                Some(chunk.chunk),
                now,
            )?;
        }
        Ok(())
    }

    fn receive_packets(&mut self, now: Instant) -> io::Result<()> {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let Ok(packet) = Packet::deserialize(&self.recv_buffer[..size]) else {
                        log::debug!("Dropping undecodable packet from {addr}");
                        continue;
                    };
                    if !packet.header.is_valid() {
                        continue;
                    }
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;
                    self.handle_packet(packet, addr, now);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                // Windows reports ICMP port unreachable on the next receive.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr, now: Instant) {
        match packet.payload {
            PacketType::ConnectionRequest { client_salt } if self.role == Role::Server => {
                self.handle_request(addr, client_salt, now);
            }
            PacketType::ChallengeResponse { combined_salt } if self.role == Role::Server => {
                self.handle_challenge_response(addr, combined_salt, now);
            }
            PacketType::ConnectionChallenge {
                server_salt,
                challenge,
            } if self.role == Role::Client => {
                let Some(&id) = self.by_addr.get(&addr) else {
                    return;
                };
                let Some(conn) = self.connections.get_mut(&id) else {
                    return;
                };
                if conn.state != ConnectionState::Requesting
                    || challenge != conn.client_salt ^ server_salt
                {
                    return;
                }
                conn.server_salt = server_salt;
                conn.state = ConnectionState::Responding;
                conn.touch(now);
                let combined_salt = conn.combined_salt();
                self.send_unsequenced(addr, PacketType::ChallengeResponse { combined_salt });
            }
            PacketType::ConnectionAccepted if self.role == Role::Client => {
                let Some(&id) = self.by_addr.get(&addr) else {
                    return;
                };
                let Some(conn) = self.connections.get_mut(&id) else {
                    return;
                };
                if conn.state == ConnectionState::Responding {
                    conn.state = ConnectionState::Connected;
                    conn.touch(now);
                    self.push_status(id, ConnectionStatus::Connected, addr);
                }
            }
            PacketType::ConnectionDenied { reason } if self.role == Role::Client => {
                if let Some(&id) = self.by_addr.get(&addr) {
                    log::warn!("Connection to {addr} denied: {reason}");
                    self.remove(id);
                    self.push_status(id, ConnectionStatus::ClosedByPeer, addr);
                }
            }
            PacketType::Message { .. } | PacketType::Keepalive | PacketType::Disconnect { .. } => {
                self.handle_sequenced(packet, addr, now);
            }
            other => log::debug!("Ignoring unexpected {other:?} from {addr}"),
        }
    }

    fn handle_request(&mut self, addr: SocketAddr, client_salt: u64, now: Instant) {
        if let Some(&id) = self.by_addr.get(&addr) {
            if let Some(conn) = self.connections.get(&id) {
                if conn.state == ConnectionState::Challenging && conn.client_salt == client_salt {
                    let challenge = PacketType::ConnectionChallenge {
                        server_salt: conn.server_salt,
                        challenge: conn.combined_salt(),
                    };
                    self.send_unsequenced(addr, challenge);
                }
            }
            return;
        }

        if self.connections.len() >= self.config.max_connections {
            self.send_unsequenced(
                addr,
                PacketType::ConnectionDenied {
                    reason: "Server full".to_owned(),
                },
            );
            return;
        }

        let id = self.allocate_id();
        let conn = UdpConnection::new(
            id,
            addr,
            ConnectionState::Challenging,
            client_salt,
            rand_u64(),
            now,
        );
        let challenge = PacketType::ConnectionChallenge {
            server_salt: conn.server_salt,
            challenge: conn.combined_salt(),
        };
        self.insert(conn);
        self.send_unsequenced(addr, challenge);
        log::debug!("Challenging {addr} as connection {id}");
    }

    fn handle_challenge_response(&mut self, addr: SocketAddr, combined_salt: u64, now: Instant) {
        let Some(&id) = self.by_addr.get(&addr) else {
            return;
        };
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if combined_salt != conn.combined_salt() {
            log::warn!("Challenge mismatch from {addr}");
            return;
        }
        conn.touch(now);
        match conn.state {
            ConnectionState::Challenging => {
                conn.state = ConnectionState::PendingAccept;
                self.push_status(id, ConnectionStatus::Connecting, addr);
            }
            // Our acceptance was lost; repeat it.
            ConnectionState::Connected => {
                self.send_unsequenced(addr, PacketType::ConnectionAccepted);
            }
            _ => {}
        }
    }

    fn handle_sequenced(&mut self, packet: Packet, addr: SocketAddr, now: Instant) {
        let Some(&id) = self.by_addr.get(&addr) else {
            return;
        };
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.state != ConnectionState::Connected {
            return;
        }
        conn.touch(now);

        let header = packet.header;
        let acked = conn.ack_tracker.process_ack(header.ack, header.ack_bitfield, now);
        conn.channel.acknowledge(&acked);
        conn.refresh_stats();
        let fresh = conn.receive_tracker.record_received(header.sequence);

        match packet.payload {
            PacketType::Message {
                message_id,
                last,
                data,
            } => {
                // Duplicates still need an ack so the sender stops resending.
                conn.ack_owed = true;
                if !fresh {
                    return;
                }
                for data in conn.channel.receive(message_id, last, data) {
                    self.events.push(TransportEvent::Message {
                        connection: id,
                        data,
                    });
                }
            }
            PacketType::Disconnect { reason } => {
                log::info!("Connection {id} ({addr}) closed by peer: {reason}");
                self.remove(id);
                self.push_status(id, ConnectionStatus::ClosedByPeer, addr);
            }
            _ => {}
        }
    }

    fn maintain(&mut self, now: Instant) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        let retry_handshake =
            now.duration_since(self.last_handshake) >= self.config.handshake_interval;
        if retry_handshake {
            self.last_handshake = now;
        }

        for id in ids {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            let addr = conn.addr;

            if conn.is_timed_out(self.config.timeout, now) {
                log::warn!("Connection {id} ({addr}) timed out");
                self.remove(id);
                self.push_status(id, ConnectionStatus::ProblemDetectedLocally, addr);
                continue;
            }

            let state = conn.state;
            match state {
                ConnectionState::Requesting if retry_handshake => {
                    let client_salt = conn.client_salt;
                    self.send_unsequenced(addr, PacketType::ConnectionRequest { client_salt });
                }
                ConnectionState::Responding if retry_handshake => {
                    let combined_salt = conn.combined_salt();
                    self.send_unsequenced(addr, PacketType::ChallengeResponse { combined_salt });
                }
                ConnectionState::Connected => {
                    let keepalive_due = conn.ack_owed
                        || now.duration_since(conn.last_send_time) >= self.config.keepalive_interval;
                    if let Err(e) = self.flush(id, now) {
                        log::warn!("Failed to flush connection {id}: {e}");
                    }
                    let still_owed = self
                        .connections
                        .get(&id)
                        .is_some_and(|conn| conn.ack_owed || keepalive_due);
                    if still_owed {
                        if let Err(e) = self.send_sequenced(id, PacketType::Keepalive, None, now) {
                            log::warn!("Failed to send keepalive to {addr}: {e}");
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl Transport for UdpTransport {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let now = Instant::now();
        if let Err(e) = self.receive_packets(now) {
            log::error!("Socket receive failed: {e}");
        }
        self.maintain(now);
        std::mem::take(&mut self.events)
    }

    fn accept(&mut self, connection: ConnectionId) -> Result<(), TransportError> {
        let conn = self
            .connections
            .get_mut(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        if conn.state != ConnectionState::PendingAccept {
            return Err(TransportError::NotConnected(connection));
        }
        conn.state = ConnectionState::Connected;
        conn.touch(Instant::now());
        let addr = conn.addr;
        self.send_unsequenced(addr, PacketType::ConnectionAccepted);
        self.push_status(connection, ConnectionStatus::Connected, addr);
        Ok(())
    }

    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        let conn = self
            .connections
            .get_mut(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        if conn.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected(connection));
        }
        conn.channel.queue(data);
        self.flush(connection, Instant::now())
    }

    fn close(&mut self, connection: ConnectionId, reason: &str) {
        let Some(conn) = self.remove(connection) else {
            return;
        };
        let payload = match conn.state {
            ConnectionState::Connected => PacketType::Disconnect {
                reason: reason.to_owned(),
            },
            _ if self.role == Role::Server => PacketType::ConnectionDenied {
                reason: reason.to_owned(),
            },
            _ => return,
        };
        let packet = Packet::new(PacketHeader::new(0, 0, 0), payload);
        // Sent twice; there is no one left to resend it.
        for _ in 0..2 {
            if let Err(e) = Self::write_packet(
                &self.socket,
                &mut self.stats,
                &self.config.packet_loss,
                &packet,
                conn.addr,
            ) {
                log::warn!("Failed to send disconnect to {}: {e}", conn.addr);
            }
        }
        log::info!("Closed connection {connection} ({}): {reason}", conn.addr);
    }
}
