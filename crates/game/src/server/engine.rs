use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::bsp::LoadError;
use crate::entity::base::BASE_ENTITY;
use crate::entity::{ClientId, EntityId, IdAllocator, RegistryError, ServerEntity, ServerRegistry};
use crate::level::{HeadlessScene, Level, LevelLoader, NoPhysics, PhysicsBackend};
use crate::net::{
    ClientState, ConnectionId, ConnectionStatus, Datagram, DatagramIterator, Message, MessageType,
    Transport, TransportEvent, begin_message, read_message_type,
};
use crate::props::PropError;
use crate::simulation::{Simulation, TickInfo, TickPipeline};

use super::config::ServerConfig;
use super::events::{DisconnectReason, ServerEvent};

/// Receives `CMD` strings together with the sender's player entity.
pub type CommandHandler = Box<dyn FnMut(ClientId, &str, Option<&mut ServerEntity>)>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("entity id pool is exhausted")]
    EntityPoolExhausted,
    #[error(transparent)]
    Load(#[from] LoadError),
}

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub connection: ConnectionId,
    pub state: ClientState,
    pub last_heartbeat: Instant,
    /// Entities despawned together with this client; the first is its player.
    pub owned_entities: Vec<EntityId>,
}

/// Authoritative simulation and snapshot broadcaster.
pub struct Server<T, P = NoPhysics> {
    transport: T,
    config: ServerConfig,
    registry: ServerRegistry,
    entities: Vec<ServerEntity>,
    entity_ids: IdAllocator,
    clients: BTreeMap<ConnectionId, ClientRecord>,
    client_ids: IdAllocator,
    levels: LevelLoader<HeadlessScene, P>,
    simulation: Option<Simulation<Server<T, P>>>,
    tick: TickInfo,
    command_handler: Option<CommandHandler>,
    events: VecDeque<ServerEvent>,
}

impl<T, P> Server<T, P>
where
    T: Transport + 'static,
    P: PhysicsBackend + 'static,
{
    pub fn new(transport: T, registry: ServerRegistry, config: ServerConfig, physics: P) -> Self {
        let levels = LevelLoader::new(
            HeadlessScene,
            physics,
            config.maps_dir.clone(),
            config.load_options.clone(),
        );
        let simulation = Simulation::new(config.tick_rate, Self::pipeline());
        let tick = simulation.clock().info();

        Self {
            transport,
            config,
            registry,
            entities: Vec::new(),
            entity_ids: IdAllocator::entities(),
            clients: BTreeMap::new(),
            client_ids: IdAllocator::clients(),
            levels,
            simulation: Some(simulation),
            tick,
            command_handler: None,
            events: VecDeque::new(),
        }
    }

    /// Network input, then entity logic, then physics, then the snapshot.
    fn pipeline() -> TickPipeline<Self> {
        TickPipeline::new()
            .stage("network", |server: &mut Self, tick| {
                server.tick = *tick;
                server.process_network(Instant::now());
            })
            .stage("entities", |server: &mut Self, tick| {
                for entity in &mut server.entities {
                    entity.think(tick);
                }
            })
            .stage("physics", |server: &mut Self, tick| {
                server.levels.physics_mut().step(tick.interval);
            })
            .stage("snapshot", |server: &mut Self, tick| server.send_snapshot(tick))
    }

    /// Feeds elapsed real time and runs every tick that became due.
    pub fn update(&mut self, delta: f32) -> u32 {
        let Some(mut simulation) = self.simulation.take() else {
            return 0;
        };
        let ticks = simulation.update(self, delta);
        self.simulation = Some(simulation);
        ticks
    }

    /// Runs one tick immediately.
    pub fn step(&mut self) {
        if let Some(mut simulation) = self.simulation.take() {
            simulation.step(self);
            self.simulation = Some(simulation);
        }
    }

    /// Seconds until the next tick is due.
    pub fn time_until_tick(&self) -> f32 {
        self.simulation
            .as_ref()
            .map_or(0.0, |simulation| simulation.timestep().remaining())
    }

    pub fn tick(&self) -> TickInfo {
        self.tick
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ServerRegistry {
        &mut self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn set_command_handler(&mut self, handler: CommandHandler) {
        self.command_handler = Some(handler);
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.events.drain(..)
    }

    pub fn level(&self) -> Option<&Level> {
        self.levels.level()
    }

    pub fn map_name(&self) -> Option<&str> {
        self.levels.level().map(Level::name)
    }

    pub fn entities(&self) -> &[ServerEntity] {
        &self.entities
    }

    pub fn entity(&self, id: EntityId) -> Option<&ServerEntity> {
        self.entities.iter().find(|entity| entity.id() == id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut ServerEntity> {
        self.entities.iter_mut().find(|entity| entity.id() == id)
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }

    pub fn client(&self, client_id: ClientId) -> Option<&ClientRecord> {
        self.clients
            .values()
            .find(|client| client.client_id == client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn spawn_entity(&mut self, network_name: &str) -> Result<EntityId, ServerError> {
        self.spawn_entity_with(network_name, |_| {})
    }

    /// Creates an entity, lets `setup` initialise it, then spawns it.
    pub fn spawn_entity_with<F>(&mut self, network_name: &str, setup: F) -> Result<EntityId, ServerError>
    where
        F: FnOnce(&mut ServerEntity),
    {
        let id = self
            .entity_ids
            .allocate()
            .ok_or(ServerError::EntityPoolExhausted)?;
        let mut entity = match self.registry.create(network_name, id) {
            Ok(entity) => entity,
            Err(err) => {
                self.entity_ids.free(id);
                return Err(err.into());
            }
        };

        setup(&mut entity);
        entity.spawn();
        log::debug!("Spawned {network_name} ({id})");
        self.entities.push(entity);
        Ok(id)
    }

    /// Despawns `id`, returns its id to the pool and tells every client.
    pub fn despawn_entity(&mut self, id: EntityId) -> bool {
        let Some(index) = self.entities.iter().position(|entity| entity.id() == id) else {
            return false;
        };
        let mut entity = self.entities.remove(index);
        entity.despawn();
        self.entity_ids.free(id);
        for client in self.clients.values_mut() {
            client.owned_entities.retain(|&owned| owned != id);
        }
        log::debug!("Despawned {} ({id})", entity.network_name());

        match (Message::DeleteEntity { entity_id: id }).encode() {
            Ok(dg) => self.broadcast(&dg, false),
            Err(err) => log::error!("Failed to encode entity deletion: {err}"),
        }
        true
    }

    /// Serializes every live entity. Delta snapshots carry only the fields
    /// changed since the previous delta and reset the change trackers.
    pub fn build_snapshot(&mut self, full: bool) -> Datagram {
        let mut body = Datagram::new();
        let mut count = 0u32;

        for entity in &mut self.entities {
            let mut record = Datagram::new();
            match write_entity(entity, full, &mut record) {
                Ok(()) => {
                    body.append_data(record.as_bytes());
                    count += 1;
                    if !full {
                        entity.reset_changes();
                    }
                }
                Err(err) => {
                    log::error!(
                        "Leaving {} ({}) out of the snapshot: {err}",
                        entity.network_name(),
                        entity.id()
                    );
                    // Resend everything with the next delta.
                    if !full {
                        entity.vars_mut().mark_fully_changed();
                    }
                }
            }
        }

        let mut dg = begin_message(MessageType::Snapshot);
        dg.add_u32(count);
        dg.append_data(body.as_bytes());
        dg
    }

    /// Sends to every client, or only to those already playing. A failed send
    /// is logged and does not stop delivery to the rest.
    pub fn broadcast(&mut self, dg: &Datagram, only_playing: bool) {
        for client in self.clients.values() {
            if only_playing && client.state != ClientState::Playing {
                continue;
            }
            if let Err(err) = self.transport.send(client.connection, dg.as_bytes()) {
                log::warn!("Failed to send to client {}: {err}", client.client_id);
            }
        }
    }

    fn send_to(&mut self, connection: ConnectionId, dg: &Datagram) {
        if let Err(err) = self.transport.send(connection, dg.as_bytes()) {
            log::warn!("Failed to send to connection {connection}: {err}");
        }
    }

    fn send_message(&mut self, connection: ConnectionId, message: &Message) {
        match message.encode() {
            Ok(dg) => self.send_to(connection, &dg),
            Err(err) => log::error!("Failed to encode {:?}: {err}", message.message_type()),
        }
    }

    fn send_snapshot(&mut self, tick: &TickInfo) {
        let snapshot = self.build_snapshot(false);
        self.broadcast(&snapshot, true);

        let message = Message::Tick {
            tick: tick.tick,
            interval_per_tick: tick.interval,
        };
        match message.encode() {
            Ok(dg) => self.broadcast(&dg, false),
            Err(err) => log::error!("Failed to encode tick: {err}"),
        }
    }

    fn process_network(&mut self, now: Instant) {
        for event in self.transport.poll() {
            match event {
                TransportEvent::StatusChanged {
                    connection,
                    status,
                    addr,
                } => match status {
                    ConnectionStatus::Connecting => self.on_connecting(connection, addr),
                    ConnectionStatus::Connected => self.on_connected(connection, now),
                    ConnectionStatus::ClosedByPeer => {
                        self.remove_client(connection, DisconnectReason::Graceful)
                    }
                    ConnectionStatus::ProblemDetectedLocally => {
                        self.remove_client(connection, DisconnectReason::ConnectionLost)
                    }
                },
                TransportEvent::Message { connection, data } => {
                    self.on_message(connection, &data, now)
                }
            }
        }
        self.check_heartbeats(now);
    }

    fn on_connecting(&mut self, connection: ConnectionId, addr: Option<std::net::SocketAddr>) {
        if self.clients.len() >= self.config.max_clients {
            let reason = "server is full";
            log::warn!("Refusing connection {connection}: {reason}");
            self.transport.close(connection, reason);
            self.events.push_back(ServerEvent::ConnectionDenied {
                connection,
                reason: reason.to_owned(),
            });
            return;
        }

        match addr {
            Some(addr) => log::info!("Connection {connection} from {addr}"),
            None => log::info!("Connection {connection}"),
        }
        if let Err(err) = self.transport.accept(connection) {
            log::warn!("Failed to accept connection {connection}: {err}");
        }
    }

    fn on_connected(&mut self, connection: ConnectionId, now: Instant) {
        if self.clients.contains_key(&connection) {
            return;
        }
        let Some(client_id) = self
            .client_ids
            .allocate()
            .and_then(|id| ClientId::try_from(id).ok())
        else {
            self.transport.close(connection, "no client ids left");
            return;
        };

        self.clients.insert(
            connection,
            ClientRecord {
                client_id,
                connection,
                state: ClientState::None,
                last_heartbeat: now,
                owned_entities: Vec::new(),
            },
        );

        let hello = Message::HelloResp {
            client_id,
            map: self.map_name().unwrap_or_default().to_owned(),
        };
        self.send_message(connection, &hello);

        let entity_id = match self.spawn_entity_with(BASE_ENTITY, |entity| {
            entity.set_owner(Some(client_id))
        }) {
            Ok(id) => {
                if let Some(client) = self.clients.get_mut(&connection) {
                    client.owned_entities.push(id);
                }
                Some(id)
            }
            Err(err) => {
                log::error!("Failed to spawn player for client {client_id}: {err}");
                None
            }
        };

        log::info!("Client {client_id} connected");
        self.events.push_back(ServerEvent::ClientConnected {
            client_id,
            connection,
            entity_id,
        });
    }

    fn on_message(&mut self, connection: ConnectionId, data: &[u8], now: Instant) {
        let Some(client_id) = self.clients.get(&connection).map(|client| client.client_id) else {
            log::debug!("Dropping message from unknown connection {connection}");
            return;
        };

        let mut dgi = DatagramIterator::new(data);
        let message = read_message_type(&mut dgi)
            .and_then(|msg| Message::decode_payload(msg, &mut dgi));

        match message {
            Ok(Some(Message::ClientState(state))) => self.set_client_state(connection, state),
            Ok(Some(Message::ClientHeartbeat)) => {
                if let Some(client) = self.clients.get_mut(&connection) {
                    client.last_heartbeat = now;
                }
            }
            Ok(Some(Message::Cmd(command))) => self.run_command(connection, client_id, command),
            Ok(Some(Message::Tick { .. })) => {}
            Ok(other) => {
                log::warn!("Client {client_id} sent an unexpected message: {other:?}");
                self.kick_connection(connection, DisconnectReason::ProtocolViolation);
            }
            Err(err) => {
                log::warn!("Client {client_id} sent a malformed message: {err}");
                self.kick_connection(connection, DisconnectReason::ProtocolViolation);
            }
        }
    }

    fn set_client_state(&mut self, connection: ConnectionId, state: ClientState) {
        let Some(client) = self.clients.get_mut(&connection) else {
            return;
        };
        client.state = state;
        let client_id = client.client_id;
        log::info!("Client {client_id} is now {state:?}");
        self.events
            .push_back(ServerEvent::ClientStateChanged { client_id, state });

        if state == ClientState::Playing {
            let snapshot = self.build_snapshot(true);
            self.send_to(connection, &snapshot);
        }
    }

    fn run_command(&mut self, connection: ConnectionId, client_id: ClientId, command: String) {
        let player = self
            .clients
            .get(&connection)
            .and_then(|client| client.owned_entities.first().copied());

        if let Some(handler) = self.command_handler.as_mut() {
            let entity = player.and_then(|id| self.entities.iter_mut().find(|e| e.id() == id));
            handler(client_id, &command, entity);
        }
        self.events
            .push_back(ServerEvent::Command { client_id, command });
    }

    /// Drops every client whose last heartbeat is older than the tolerance.
    pub fn check_heartbeats(&mut self, now: Instant) {
        let tolerance = self.config.heartbeat_tolerance;
        let silent: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| now.saturating_duration_since(client.last_heartbeat) > tolerance)
            .map(|client| client.connection)
            .collect();

        for connection in silent {
            log::warn!("Connection {connection} stopped sending heartbeats");
            self.kick_connection(connection, DisconnectReason::Timeout);
        }
    }

    pub fn kick(&mut self, client_id: ClientId) -> bool {
        let Some(connection) = self.client(client_id).map(|client| client.connection) else {
            return false;
        };
        self.kick_connection(connection, DisconnectReason::Kicked);
        true
    }

    fn kick_connection(&mut self, connection: ConnectionId, reason: DisconnectReason) {
        self.transport.close(connection, reason.as_str());
        self.remove_client(connection, reason);
    }

    fn remove_client(&mut self, connection: ConnectionId, reason: DisconnectReason) {
        let Some(client) = self.clients.remove(&connection) else {
            return;
        };
        for id in client.owned_entities {
            self.despawn_entity(id);
        }
        self.client_ids.free(client.client_id.into());

        log::info!("Client {} {}", client.client_id, reason.as_str());
        self.events.push_back(ServerEvent::ClientDisconnected {
            client_id: client.client_id,
            reason,
        });
    }

    pub fn shutdown(&mut self) {
        let connections: Vec<ConnectionId> = self.clients.keys().copied().collect();
        for connection in connections {
            self.transport.close(connection, "server shutting down");
            self.remove_client(connection, DisconnectReason::Kicked);
        }
        self.levels.unload();
    }

    /// Announces the change, tears down the old level and its entities, then
    /// loads `map` from the maps directory.
    pub fn change_level(&mut self, map: &str) -> Result<(), ServerError> {
        self.begin_level_change(map);
        self.levels.load(map)?;
        self.spawn_map_entities();
        Ok(())
    }

    /// Same as [`change_level`](Self::change_level) for a map in memory.
    pub fn change_level_from_bytes(&mut self, map: &str, data: &[u8]) -> Result<(), ServerError> {
        self.begin_level_change(map);
        self.levels.load_bytes(map, data)?;
        self.spawn_map_entities();
        Ok(())
    }

    fn begin_level_change(&mut self, map: &str) {
        log::info!("Changing level to {map}");
        let message = Message::ChangeLevel {
            map: map.to_owned(),
            is_transition: false,
        };
        match message.encode() {
            Ok(dg) => self.broadcast(&dg, false),
            Err(err) => log::error!("Failed to encode level change: {err}"),
        }

        let owned: HashSet<EntityId> = self
            .clients
            .values()
            .flat_map(|client| client.owned_entities.iter().copied())
            .collect();
        let doomed: Vec<EntityId> = self
            .entities
            .iter()
            .map(ServerEntity::id)
            .filter(|id| !owned.contains(id))
            .collect();
        for id in doomed {
            self.despawn_entity(id);
        }

        for client in self.clients.values_mut() {
            if client.state == ClientState::Playing {
                client.state = ClientState::Loading;
            }
        }
    }

    fn spawn_map_entities(&mut self) {
        let Some(tree) = self.levels.level().map(|level| Arc::clone(level.tree())) else {
            return;
        };

        let mut spawned = 0;
        for map_entity in tree.entities() {
            let Some(class) = self
                .registry
                .class_for_map_entity(map_entity.classname())
                .map(str::to_owned)
            else {
                continue;
            };
            let result = self.spawn_entity_with(&class, |entity| {
                for (key, value) in map_entity.pairs() {
                    if key != "classname" {
                        entity.key_value(key, value);
                    }
                }
            });
            match result {
                Ok(_) => spawned += 1,
                Err(err) => log::warn!("Failed to spawn map entity {}: {err}", map_entity.classname()),
            }
        }

        let map = self.map_name().unwrap_or_default().to_owned();
        log::info!("Spawned {spawned} map entities for {map}");
        self.events.push_back(ServerEvent::LevelChanged { map });
    }
}

fn write_entity(entity: &ServerEntity, full: bool, dg: &mut Datagram) -> Result<(), PropError> {
    dg.add_u32(entity.id());
    dg.add_string(entity.network_name())
        .map_err(|source| PropError::Datagram {
            prop: "network_name".to_owned(),
            source,
        })?;
    dg.add_u16(entity.prop_count(full));
    entity.write_props(full, dg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::base::ORIGIN;
    use crate::net::LoopbackHub;
    use crate::props::PropValue;
    use glam::Vec3;

    fn server() -> Server<crate::net::LoopbackServer> {
        let hub = LoopbackHub::new();
        Server::new(
            hub.server(),
            ServerRegistry::with_base_entity().unwrap(),
            ServerConfig::default(),
            NoPhysics,
        )
    }

    fn entity_count(dg: &Datagram) -> u32 {
        let mut dgi = DatagramIterator::new(dg.as_bytes());
        assert_eq!(read_message_type(&mut dgi).unwrap(), MessageType::Snapshot);
        dgi.get_u32().unwrap()
    }

    #[test]
    fn delta_resets_changes() {
        let mut server = server();
        let id = server.spawn_entity(BASE_ENTITY).unwrap();
        assert_eq!(id, 1);
        assert!(server.entity(id).unwrap().is_fully_changed());

        let first = server.build_snapshot(false);
        assert_eq!(entity_count(&first), 1);
        assert_eq!(server.entity(id).unwrap().prop_count(false), 0);

        server.entity_mut(id).unwrap().vars_mut().set(ORIGIN, Vec3::X);
        assert_eq!(server.entity(id).unwrap().prop_count(false), 1);
        server.build_snapshot(false);
        assert_eq!(server.entity(id).unwrap().prop_count(false), 0);
    }

    #[test]
    fn unwritable_entities_keep_their_delta() {
        let mut server = server();
        let id = server.spawn_entity(BASE_ENTITY).unwrap();
        server.build_snapshot(false);

        let vars = server.entity_mut(id).unwrap().vars_mut();
        vars.write(ORIGIN.index(), PropValue::Str("bad".into()));
        assert_eq!(entity_count(&server.build_snapshot(false)), 0);
        assert!(server.entity(id).unwrap().is_fully_changed());

        let vars = server.entity_mut(id).unwrap().vars_mut();
        vars.write(ORIGIN.index(), PropValue::Vec3(Vec3::X));
        assert_eq!(entity_count(&server.build_snapshot(false)), 1);
        assert_eq!(server.entity(id).unwrap().prop_count(false), 0);
    }

    #[test]
    fn full_snapshots_leave_changes_alone() {
        let mut server = server();
        let id = server.spawn_entity(BASE_ENTITY).unwrap();
        server.build_snapshot(false);
        server.entity_mut(id).unwrap().set_origin(Vec3::Y);

        let a = server.build_snapshot(true);
        let b = server.build_snapshot(true);
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(server.entity(id).unwrap().prop_count(false), 1);
    }

    #[test]
    fn ids_are_reused_after_despawn() {
        let mut server = server();
        let a = server.spawn_entity(BASE_ENTITY).unwrap();
        let b = server.spawn_entity(BASE_ENTITY).unwrap();
        assert_ne!(a, b);

        assert!(server.despawn_entity(a));
        assert!(!server.despawn_entity(a));
        assert_eq!(server.spawn_entity(BASE_ENTITY).unwrap(), a);
        assert!(matches!(
            server.spawn_entity("prop_physics"),
            Err(ServerError::Registry(RegistryError::UnknownNetworkClass(_)))
        ));
        assert_eq!(server.entities().len(), 2);
    }
}
