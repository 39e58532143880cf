use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bsp::LoadOptions;
use crate::net::{DEFAULT_PORT, DEFAULT_TICK_RATE};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub tick_rate: u32,
    pub max_clients: usize,
    /// Clients silent for longer than this are dropped.
    pub heartbeat_tolerance: Duration,
    pub map: Option<String>,
    pub maps_dir: PathBuf,
    pub load_options: LoadOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            heartbeat_tolerance: Duration::from_secs(20),
            map: None,
            maps_dir: PathBuf::from("maps/"),
            load_options: LoadOptions::default(),
        }
    }
}
