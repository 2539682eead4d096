//! Configuration system.
//!
//! Loads realm configuration from JSON strings/files. Command line overrides
//! are applied by the binaries.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hmac_secret is required")]
    MissingSecret,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealmConfig {
    /// Server listen address, e.g. `127.0.0.1:8080`.
    pub server_addr: String,
    /// Directory holding Tiled JSON maps.
    pub maps_dir: String,
    /// Shared secret used to verify access tokens.
    pub hmac_secret: Option<String>,
    /// Expected `iss` claim.
    pub token_issuer: String,
    /// Hard cap on concurrent connections.
    pub max_clients: usize,
    pub simulation_hz: u32,
    pub flush_hz: u32,
    pub broadcast_hz: u32,
    /// How long a new connection may take to send its login frame.
    pub login_timeout_ms: u64,
    /// Read deadline after login; any inbound frame resets it.
    pub liveness_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub outbound_queue_capacity: usize,
    pub max_frame_bytes: usize,
    /// AOI margin around the viewport, in tiles.
    pub aoi_buffer_tiles: i32,
    /// Character slots offered on the selection screen.
    pub character_slots: usize,
    /// World and position new characters are loaded into.
    pub spawn_world: String,
    pub spawn_x: i32,
    pub spawn_y: i32,
    /// Player name (client only).
    pub player_name: String,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            maps_dir: "maps".to_string(),
            hmac_secret: None,
            token_issuer: "realm-auth".to_string(),
            max_clients: 100,
            simulation_hz: 60,
            flush_hz: 240,
            broadcast_hz: 60,
            login_timeout_ms: 5_000,
            liveness_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            outbound_queue_capacity: 64,
            max_frame_bytes: 4_096,
            aoi_buffer_tiles: 5,
            character_slots: 9,
            spawn_world: "untitled".to_string(),
            spawn_x: 400,
            spawn_y: 400,
            player_name: "Player".to_string(),
        }
    }
}

fn period(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(hz.max(1)))
}

impl RealmConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    /// Checks the values the server cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hmac_secret.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingSecret);
        }
        let nonzero = [
            ("max_clients", self.max_clients as u64),
            ("simulation_hz", u64::from(self.simulation_hz)),
            ("flush_hz", u64::from(self.flush_hz)),
            ("broadcast_hz", u64::from(self.broadcast_hz)),
            ("outbound_queue_capacity", self.outbound_queue_capacity as u64),
            ("max_frame_bytes", self.max_frame_bytes as u64),
            ("liveness_timeout_ms", self.liveness_timeout_ms),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }

    pub fn simulation_period(&self) -> Duration {
        period(self.simulation_hz)
    }

    pub fn flush_period(&self) -> Duration {
        period(self.flush_hz)
    }

    pub fn broadcast_period(&self) -> Duration {
        period(self.broadcast_hz)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    /// Idle time after which a keepalive is sent; shorter than the liveness
    /// timeout so a healthy peer never hits its deadline.
    pub fn keepalive_interval(&self) -> Duration {
        self.liveness_timeout() * 9 / 10
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
