use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bsp::LoadOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Interval between `CLIENT_HEARTBEAT` messages.
    pub heartbeat_rate: Duration,
    pub maps_dir: PathBuf,
    pub load_options: LoadOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_rate: Duration::from_secs(1),
            maps_dir: PathBuf::from("maps/"),
            load_options: LoadOptions::default(),
        }
    }
}
