use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::Vec3;

use pvsnet::entity::base::BASE_ENTITY;
use pvsnet::entity::{ClientId, ServerEntity, ServerRegistry};
use pvsnet::level::NoPhysics;
use pvsnet::net::{NetworkStats, UdpConfig, UdpTransport};
use pvsnet::server::{Server, ServerConfig, ServerEvent};

/// Map classnames replicated as plain base entities.
const LINKED_CLASSES: [&str; 3] = ["info_player_start", "info_target", "light"];

const MAX_SLEEP: Duration = Duration::from_millis(5);

/// Dedicated server process: the replication server on a UDP socket, paced
/// by wall clock time.
pub struct Host {
    server: Server<UdpTransport>,
    running: Arc<AtomicBool>,
    start_time: Instant,
    last_frame: Instant,
}

impl Host {
    pub fn new(bind: &str, config: ServerConfig, udp: UdpConfig) -> Result<Self> {
        let transport = UdpTransport::listen((bind, config.port), udp)
            .with_context(|| format!("failed to bind {bind}:{}", config.port))?;

        let mut registry = ServerRegistry::with_base_entity()?;
        for classname in LINKED_CLASSES {
            registry.link_entity_to_class(classname, BASE_ENTITY)?;
        }

        let map = config.map.clone();
        let mut server = Server::new(transport, registry, config, NoPhysics);
        server.set_command_handler(Box::new(run_command));
        if let Some(map) = map {
            server
                .change_level(&map)
                .with_context(|| format!("failed to load map {map}"))?;
        }

        Ok(Self {
            server,
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
            last_frame: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.transport().local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn server(&self) -> &Server<UdpTransport> {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut Server<UdpTransport> {
        &mut self.server
    }

    pub fn stats(&self) -> NetworkStats {
        self.server.transport().stats()
    }

    /// Runs every tick that came due since the previous frame.
    pub fn frame(&mut self) -> u32 {
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.server.update(delta.as_secs_f32())
    }

    /// Sleeps until the next tick, never longer than a few milliseconds so
    /// socket reads stay responsive.
    pub fn idle(&self) {
        let wait = Duration::from_secs_f32(self.server.time_until_tick());
        thread::sleep(wait.min(MAX_SLEEP));
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.frame();
            for event in self.server.drain_events() {
                log::info!("{}", describe(&event));
            }
            self.idle();
        }
    }

    pub fn shutdown(&mut self) {
        self.server.shutdown();
    }
}

/// One line summary of a server event.
pub fn describe(event: &ServerEvent) -> String {
    match event {
        ServerEvent::ClientConnected {
            client_id,
            connection,
            entity_id,
        } => match entity_id {
            Some(entity) => {
                format!("Client {client_id} connected on {connection} (entity {entity})")
            }
            None => format!("Client {client_id} connected on {connection} without a player"),
        },
        ServerEvent::ClientStateChanged { client_id, state } => {
            format!("Client {client_id} is {state:?}")
        }
        ServerEvent::ClientDisconnected { client_id, reason } => {
            format!("Client {client_id} {}", reason.as_str())
        }
        ServerEvent::ConnectionDenied { connection, reason } => {
            format!("Connection {connection} denied: {reason}")
        }
        ServerEvent::Command { client_id, command } => {
            format!("Client {client_id}: {command}")
        }
        ServerEvent::LevelChanged { map } => format!("Level changed to {map}"),
        ServerEvent::Error { message } => message.clone(),
    }
}

/// `setpos x y z` and `setang p y r` move the sender's player.
fn run_command(client_id: ClientId, command: &str, player: Option<&mut ServerEntity>) {
    let mut parts = command.split_whitespace();
    let Some(name) = parts.next() else {
        return;
    };
    let values: Vec<f32> = parts.filter_map(|part| part.parse().ok()).collect();
    let Some(player) = player else {
        log::debug!("Client {client_id} has no player for '{name}'");
        return;
    };

    match (name, values.as_slice()) {
        ("setpos", [x, y, z]) => player.set_origin(Vec3::new(*x, *y, *z)),
        ("setang", [p, y, r]) => player.set_angles(Vec3::new(*p, *y, *r)),
        _ => log::debug!("Client {client_id} sent unknown command '{command}'"),
    }
}
