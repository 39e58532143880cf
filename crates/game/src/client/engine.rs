use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use crate::entity::{ClientEntity, ClientId, ClientRegistry, EntityId};
use crate::net::{
    ClientState, ConnectionId, ConnectionStatus, DatagramError, DatagramIterator, Message,
    MessageType, Transport, TransportError, TransportEvent, read_message_type,
};
use crate::props::{PropError, decode_value};
use crate::simulation::TickClock;

use super::config::ClientConfig;
use super::events::ClientEvent;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplicationError {
    /// The cursor cannot be advanced past a prop of unknown width.
    #[error("entity {entity} ({class}) has no prop named '{prop}'")]
    UnknownProperty {
        entity: EntityId,
        class: String,
        prop: String,
    },
    #[error(transparent)]
    Prop(#[from] PropError),
    #[error(transparent)]
    Datagram(#[from] DatagramError),
}

/// Client side of a connection: local entity shadows plus session state.
pub struct Client<T> {
    transport: T,
    connection: ConnectionId,
    registry: ClientRegistry,
    config: ClientConfig,
    entities: BTreeMap<EntityId, ClientEntity>,
    client_id: Option<ClientId>,
    map: Option<String>,
    state: ClientState,
    connected: bool,
    clock: TickClock,
    last_heartbeat: Option<Instant>,
    events: VecDeque<ClientEvent>,
}

impl<T: Transport> Client<T> {
    pub fn new(
        transport: T,
        connection: ConnectionId,
        registry: ClientRegistry,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            connection,
            registry,
            config,
            entities: BTreeMap::new(),
            client_id: None,
            map: None,
            state: ClientState::None,
            connected: false,
            clock: TickClock::new(crate::net::DEFAULT_TICK_RATE),
            last_heartbeat: None,
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn map(&self) -> Option<&str> {
        self.map.as_deref()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn entities(&self) -> impl Iterator<Item = &ClientEntity> {
        self.entities.values()
    }

    pub fn entity(&self, id: EntityId) -> Option<&ClientEntity> {
        self.entities.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// First entity owned by this client, usually its player.
    pub fn local_entity(&self) -> Option<&ClientEntity> {
        self.entities.values().find(|entity| entity.is_owner())
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    /// Processes everything the transport delivered and sends a heartbeat
    /// when one is due.
    pub fn update(&mut self, now: Instant) {
        for event in self.transport.poll() {
            match event {
                TransportEvent::StatusChanged { status, .. } => self.on_status(status),
                TransportEvent::Message { data, .. } => self.on_message(&data),
            }
        }

        let due = self.last_heartbeat.is_none_or(|last| {
            now.saturating_duration_since(last) >= self.config.heartbeat_rate
        });
        if self.connected && due {
            self.last_heartbeat = Some(now);
            if let Err(err) = self.send(&Message::ClientHeartbeat) {
                log::warn!("Failed to send heartbeat: {err}");
            }
        }
    }

    fn on_status(&mut self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connecting => {}
            ConnectionStatus::Connected => {
                log::info!("Connected, waiting for the server hello");
                self.connected = true;
                self.last_heartbeat = None;
            }
            ConnectionStatus::ClosedByPeer => self.on_disconnect("closed by server"),
            ConnectionStatus::ProblemDetectedLocally => self.on_disconnect("connection lost"),
        }
    }

    fn on_message(&mut self, data: &[u8]) {
        let mut dgi = DatagramIterator::new(data);
        let msg = match read_message_type(&mut dgi) {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("Dropping malformed message: {err}");
                return;
            }
        };

        if msg == MessageType::Snapshot {
            if let Err(err) = self.receive_snapshot(&mut dgi) {
                log::error!("Snapshot rejected: {err}");
                self.events.push_back(ClientEvent::SnapshotRejected(err));
            }
            return;
        }

        match Message::decode_payload(msg, &mut dgi) {
            Ok(Some(Message::HelloResp { client_id, map })) => {
                log::info!("Server assigned client id {client_id}, map {map}");
                self.client_id = Some(client_id);
                self.map = Some(map.clone());
                self.report_state(ClientState::Loading);
                self.events
                    .push_back(ClientEvent::Connected { client_id, map });
            }
            Ok(Some(Message::DeleteEntity { entity_id })) => {
                self.remove_entity(entity_id);
            }
            Ok(Some(Message::ChangeLevel { map, is_transition })) => {
                log::info!("Server changed level to {map}");
                self.map = Some(map.clone());
                self.report_state(ClientState::Loading);
                self.events
                    .push_back(ClientEvent::ChangeLevel { map, is_transition });
            }
            Ok(Some(Message::Tick {
                tick,
                interval_per_tick,
            })) => {
                self.clock.sync(tick, interval_per_tick);
                self.events.push_back(ClientEvent::Tick {
                    tick,
                    interval_per_tick,
                });
            }
            Ok(Some(Message::ServerHeartbeat)) => {}
            Ok(other) => log::warn!("Unexpected message from server: {other:?}"),
            Err(err) => log::warn!("Dropping malformed {msg:?}: {err}"),
        }
    }

    /// Applies a snapshot positioned just after its message tag.
    ///
    /// Every entity is decoded first, then newly created entities are spawned,
    /// then entities that received at least one prop get `post_update`. An
    /// unknown class is skipped; an unknown prop aborts the rest.
    pub fn receive_snapshot(
        &mut self,
        dgi: &mut DatagramIterator<'_>,
    ) -> Result<usize, ReplicationError> {
        let mut spawned = Vec::new();
        let mut updated = Vec::new();
        let result = self.decode_snapshot(dgi, &mut spawned, &mut updated);

        for id in &spawned {
            if let Some(entity) = self.entities.get_mut(id) {
                entity.spawn();
            }
        }
        for id in &updated {
            if let Some(entity) = self.entities.get_mut(id) {
                entity.post_update(self.client_id);
            }
        }
        result
    }

    fn decode_snapshot(
        &mut self,
        dgi: &mut DatagramIterator<'_>,
        spawned: &mut Vec<EntityId>,
        updated: &mut Vec<EntityId>,
    ) -> Result<usize, ReplicationError> {
        let count = dgi.get_u32()?;

        for _ in 0..count {
            let id = dgi.get_u32()?;
            let class = dgi.get_string()?;
            let num_props = dgi.get_u16()?;

            if !self.entities.contains_key(&id) {
                match self.registry.create(&class, id) {
                    Ok(entity) => {
                        self.entities.insert(id, entity);
                        spawned.push(id);
                    }
                    Err(err) => {
                        log::error!("Skipping entity {id}: {err}");
                        self.skip_props(id, &class, num_props, dgi)?;
                        continue;
                    }
                }
            }

            let Some(entity) = self.entities.get_mut(&id) else {
                continue;
            };
            for _ in 0..num_props {
                let prop = dgi.get_string()?;
                if !entity.decode_prop(&prop, dgi)? {
                    return Err(ReplicationError::UnknownProperty {
                        entity: id,
                        class,
                        prop,
                    });
                }
            }
            if num_props > 0 && !updated.contains(&id) {
                updated.push(id);
            }
        }

        Ok(count as usize)
    }

    /// Steps over the props of an entity whose class is not registered.
    fn skip_props(
        &self,
        id: EntityId,
        class: &str,
        num_props: u16,
        dgi: &mut DatagramIterator<'_>,
    ) -> Result<(), ReplicationError> {
        for _ in 0..num_props {
            let prop = dgi.get_string()?;
            let Some(kind) = self.registry.wire_kind(&prop) else {
                return Err(ReplicationError::UnknownProperty {
                    entity: id,
                    class: class.to_owned(),
                    prop,
                });
            };
            decode_value(kind, dgi)?;
        }
        Ok(())
    }

    /// Despawns and forgets a shadow entity.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        match self.entities.remove(&id) {
            Some(mut entity) => {
                entity.despawn();
                log::debug!("Removed entity {id}");
                true
            }
            None => false,
        }
    }

    pub fn clear_entities(&mut self) {
        for (_, mut entity) in std::mem::take(&mut self.entities) {
            entity.despawn();
        }
    }

    /// Reports the loading state to the server.
    pub fn set_state(&mut self, state: ClientState) -> Result<(), TransportError> {
        self.state = state;
        self.send(&Message::ClientState(state))
    }

    fn report_state(&mut self, state: ClientState) {
        if let Err(err) = self.set_state(state) {
            log::warn!("Failed to report state {state:?}: {err}");
        }
    }

    pub fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        self.send(&Message::Cmd(command.to_owned()))
    }

    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let dg = message
            .encode()
            .map_err(|err| TransportError::Encode(err.to_string()))?;
        self.transport.send(self.connection, dg.as_bytes())
    }

    pub fn disconnect(&mut self) {
        if self.connected {
            self.transport.close(self.connection, "client disconnect");
            self.on_disconnect("disconnected");
        }
    }

    fn on_disconnect(&mut self, reason: &str) {
        log::info!("Disconnected: {reason}");
        self.clear_entities();
        self.connected = false;
        self.client_id = None;
        self.state = ClientState::None;
        self.events.push_back(ClientEvent::Disconnected {
            reason: reason.to_owned(),
        });
    }
}
