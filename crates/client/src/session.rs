use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::Vec3;

use pvsnet::bsp::Aabb;
use pvsnet::client::{Client, ClientConfig, ClientEvent};
use pvsnet::entity::ClientRegistry;
use pvsnet::level::{HeadlessScene, LevelLoader, NoPhysics};
use pvsnet::net::{ClientState, UdpConfig, UdpTransport};

/// Half extents of the box used to cull replicated entities.
const ENTITY_EXTENTS: Vec3 = Vec3::splat(16.0);

/// A connection to one server plus the level it is playing.
pub struct Session {
    client: Client<UdpTransport>,
    levels: LevelLoader<HeadlessScene, NoPhysics>,
    pending_commands: Vec<String>,
}

impl Session {
    pub fn connect(addr: &str, config: ClientConfig, commands: Vec<String>) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid server address {addr}"))?;
        let (transport, connection) = UdpTransport::connect(addr, UdpConfig::default())?;
        log::info!("Connecting to {addr}");

        let levels = LevelLoader::new(
            HeadlessScene,
            NoPhysics,
            config.maps_dir.clone(),
            config.load_options.clone(),
        );
        let client = Client::new(
            transport,
            connection,
            ClientRegistry::with_base_entity()?,
            config,
        );

        Ok(Self {
            client,
            levels,
            pending_commands: commands,
        })
    }

    /// Runs until the server closes the connection or the link drops.
    pub fn run(&mut self, frame_rate: u32) -> Result<()> {
        let frame = Duration::from_secs_f64(1.0 / f64::from(frame_rate));

        loop {
            let start = Instant::now();
            self.client.update(start);

            let events: Vec<_> = self.client.drain_events().collect();
            for event in events {
                match event {
                    ClientEvent::Connected { client_id, map } => {
                        log::info!("Joined as client {client_id}");
                        self.enter_level(&map)?;
                    }
                    ClientEvent::ChangeLevel { map, .. } => self.enter_level(&map)?,
                    ClientEvent::Tick { .. } => {}
                    ClientEvent::SnapshotRejected(err) => {
                        log::warn!("Snapshot rejected: {err}");
                    }
                    ClientEvent::Disconnected { reason } => {
                        log::info!("Disconnected: {reason}");
                        return Ok(());
                    }
                }
            }

            if self.client.state() == ClientState::Playing {
                for command in self.pending_commands.drain(..) {
                    self.client.send_command(&command)?;
                }
                self.track_player();
            }

            thread::sleep(frame.saturating_sub(start.elapsed()));
        }
    }

    /// Loads `map` and reports Playing. An empty name means the server has
    /// no level.
    fn enter_level(&mut self, map: &str) -> Result<()> {
        if map.is_empty() {
            self.levels.unload();
        } else {
            match self.levels.load(map) {
                Ok(level) => log::info!(
                    "Loaded {} ({} leaves)",
                    level.name(),
                    level.tree().leaves().len()
                ),
                Err(err) => log::error!("Failed to load map {map}: {err}"),
            }
        }
        self.client.set_state(ClientState::Playing)?;
        Ok(())
    }

    fn track_player(&self) {
        let (Some(level), Some(player)) = (self.levels.level(), self.client.local_entity())
        else {
            return;
        };

        let tracker = level.tracker();
        if !tracker.update(player.origin()) {
            return;
        }

        let visible = self
            .client
            .entities()
            .filter(|entity| {
                tracker.pvs_bounds_test(&Aabb::from_center(entity.origin(), ENTITY_EXTENTS))
            })
            .count();
        log::info!(
            "Player entered leaf {:?}: {} leaves and {}/{} entities potentially visible",
            tracker.current_leaf(),
            tracker.visible_leaves().len(),
            visible,
            self.client.entity_count()
        );
    }
}
