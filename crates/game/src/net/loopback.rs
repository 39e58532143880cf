use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::transport::{ConnectionId, ConnectionStatus, Transport, TransportError, TransportEvent};

#[derive(Debug, Default)]
struct Link {
    accepted: bool,
    fail_sends: bool,
    client_events: VecDeque<TransportEvent>,
}

#[derive(Debug, Default)]
struct HubState {
    next_connection: ConnectionId,
    links: HashMap<ConnectionId, Link>,
    server_events: VecDeque<TransportEvent>,
    orphaned: HashMap<ConnectionId, VecDeque<TransportEvent>>,
}

impl HubState {
    fn push_client(&mut self, connection: ConnectionId, event: TransportEvent) {
        match self.links.get_mut(&connection) {
            Some(link) => link.client_events.push_back(event),
            None => self.orphaned.entry(connection).or_default().push_back(event),
        }
    }
}

/// In-process transport pairing one server side with any number of clients.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

fn status(connection: ConnectionId, status: ConnectionStatus) -> TransportEvent {
    TransportEvent::StatusChanged {
        connection,
        status,
        addr: None,
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn server(&self) -> LoopbackServer {
        LoopbackServer { hub: self.clone() }
    }

    /// Opens a client side; the server sees it as `Connecting`.
    pub fn connect(&self) -> LoopbackClient {
        let mut state = self.lock();
        state.next_connection += 1;
        let connection = state.next_connection;
        state.links.insert(connection, Link::default());
        state
            .server_events
            .push_back(status(connection, ConnectionStatus::Connecting));
        LoopbackClient {
            hub: self.clone(),
            connection,
        }
    }

    /// Makes every send towards `connection`'s client fail until cleared.
    pub fn set_send_failure(&self, connection: ConnectionId, fail: bool) {
        if let Some(link) = self.lock().links.get_mut(&connection) {
            link.fail_sends = fail;
        }
    }

    /// Drops the link as if the network failed; both ends are notified.
    pub fn sever(&self, connection: ConnectionId) {
        let mut state = self.lock();
        if let Some(mut link) = state.links.remove(&connection) {
            link.client_events
                .push_back(status(connection, ConnectionStatus::ProblemDetectedLocally));
            state.orphaned.insert(connection, link.client_events);
            state
                .server_events
                .push_back(status(connection, ConnectionStatus::ProblemDetectedLocally));
        }
    }

    pub fn connection_count(&self) -> usize {
        self.lock().links.len()
    }
}

#[derive(Debug)]
pub struct LoopbackServer {
    hub: LoopbackHub,
}

impl Transport for LoopbackServer {
    fn poll(&mut self) -> Vec<TransportEvent> {
        self.hub.lock().server_events.drain(..).collect()
    }

    fn accept(&mut self, connection: ConnectionId) -> Result<(), TransportError> {
        let mut state = self.hub.lock();
        let link = state
            .links
            .get_mut(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        link.accepted = true;
        link.client_events
            .push_back(status(connection, ConnectionStatus::Connected));
        state
            .server_events
            .push_back(status(connection, ConnectionStatus::Connected));
        Ok(())
    }

    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.hub.lock();
        let link = state
            .links
            .get_mut(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        if !link.accepted {
            return Err(TransportError::NotConnected(connection));
        }
        if link.fail_sends {
            return Err(TransportError::LinkDown(connection));
        }
        link.client_events.push_back(TransportEvent::Message {
            connection,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn close(&mut self, connection: ConnectionId, reason: &str) {
        let mut state = self.hub.lock();
        if state.links.remove(&connection).is_some() {
            log::debug!("loopback: server closed connection {connection}: {reason}");
            state.push_client(connection, status(connection, ConnectionStatus::ClosedByPeer));
        }
    }
}

#[derive(Debug)]
pub struct LoopbackClient {
    hub: LoopbackHub,
    connection: ConnectionId,
}

impl LoopbackClient {
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

impl Transport for LoopbackClient {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut state = self.hub.lock();
        if let Some(link) = state.links.get_mut(&self.connection) {
            return link.client_events.drain(..).collect();
        }
        state
            .orphaned
            .remove(&self.connection)
            .map(Vec::from)
            .unwrap_or_default()
    }

    fn accept(&mut self, connection: ConnectionId) -> Result<(), TransportError> {
        Err(TransportError::UnknownConnection(connection))
    }

    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        if connection != self.connection {
            return Err(TransportError::UnknownConnection(connection));
        }
        let mut state = self.hub.lock();
        match state.links.get(&connection) {
            Some(link) if link.accepted => {}
            Some(_) => return Err(TransportError::NotConnected(connection)),
            None => return Err(TransportError::LinkDown(connection)),
        }
        state.server_events.push_back(TransportEvent::Message {
            connection,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn close(&mut self, connection: ConnectionId, reason: &str) {
        if connection != self.connection {
            return;
        }
        let mut state = self.hub.lock();
        if state.links.remove(&connection).is_some() {
            log::debug!("loopback: client closed connection {connection}: {reason}");
            state
                .server_events
                .push_back(status(connection, ConnectionStatus::ClosedByPeer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_then_exchange() {
        let hub = LoopbackHub::new();
        let mut server = hub.server();
        let mut client = hub.connect();
        let id = client.connection();

        assert_eq!(server.poll(), vec![status(id, ConnectionStatus::Connecting)]);
        assert!(server.send(id, b"early").is_err());

        server.accept(id).unwrap();
        server.send(id, b"hello").unwrap();
        client.send(id, b"hi").unwrap();

        assert_eq!(
            client.poll(),
            vec![
                status(id, ConnectionStatus::Connected),
                TransportEvent::Message {
                    connection: id,
                    data: b"hello".to_vec()
                },
            ]
        );
        assert_eq!(
            server.poll(),
            vec![
                status(id, ConnectionStatus::Connected),
                TransportEvent::Message {
                    connection: id,
                    data: b"hi".to_vec()
                },
            ]
        );
    }

    #[test]
    fn faults_reach_both_ends() {
        let hub = LoopbackHub::new();
        let mut server = hub.server();
        let mut client = hub.connect();
        let id = client.connection();
        server.accept(id).unwrap();

        hub.set_send_failure(id, true);
        assert!(matches!(server.send(id, b"x"), Err(TransportError::LinkDown(_))));
        hub.set_send_failure(id, false);

        hub.sever(id);
        let events = client.poll();
        assert_eq!(
            events.last(),
            Some(&status(id, ConnectionStatus::ProblemDetectedLocally))
        );
        assert!(
            server
                .poll()
                .contains(&status(id, ConnectionStatus::ProblemDetectedLocally))
        );
        assert_eq!(hub.connection_count(), 0);
    }
}
