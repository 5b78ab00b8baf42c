use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use mxo_shared::{District, Location, DEFAULT_MTU};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Listen addresses for the three public-facing servers. Only the game
/// address is bound by this crate; auth and margin run elsewhere and reach
/// the world core through the session index and the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub auth: SocketAddr,
    pub game: SocketAddr,
    pub margin: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            auth: "0.0.0.0:10001".parse().expect("static addr"),
            game: "0.0.0.0:10002".parse().expect("static addr"),
            margin: "0.0.0.0:10003".parse().expect("static addr"),
        }
    }
}

/// Knobs for the per-session datagram channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Datagram budget; payloads past `mtu - headers` are fragmented.
    pub mtu: usize,
    /// Maximum outstanding reliable slots per session.
    pub window: usize,
    /// Milliseconds before an unacked slot is re-emitted.
    pub resend_interval_ms: u64,
    /// Sends of one slot before the session is torn down.
    pub max_send_count: u32,
    /// Upper bound on how long a pending ack may coalesce.
    pub ack_coalesce_ms: u64,
    /// Partial reassemblies older than this are discarded.
    pub reassembly_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub connection_timeout_ms: u64,
    /// Session decrypt failures tolerated inside the failure window.
    pub crypto_failure_limit: u32,
    pub crypto_failure_window_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            window: 64,
            resend_interval_ms: 500,
            max_send_count: 10,
            ack_coalesce_ms: 20,
            reassembly_timeout_ms: 5_000,
            ping_interval_ms: 5_000,
            connection_timeout_ms: 30_000,
            crypto_failure_limit: 16,
            crypto_failure_window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub world_name: String,
    pub tick_ms: u64,
    /// Ingress datagrams handled per tick before yielding to the rest of
    /// the tick body.
    pub ingress_budget: usize,
    pub max_connections: usize,
    pub persist_interval_ms: u64,
    pub jackout_grace_ms: u64,
    pub shutdown_deadline_ms: u64,
    pub start_district: u8,
    pub start_x: f64,
    pub start_y: f64,
    pub start_z: f64,
    pub start_o: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_name: "recursion".to_string(),
            tick_ms: 50,
            ingress_budget: 256,
            max_connections: 500,
            persist_interval_ms: 60_000,
            jackout_grace_ms: 30_000,
            shutdown_deadline_ms: 10_000,
            start_district: District::Richland.id(),
            start_x: 365.0,
            start_y: -2.0,
            start_z: -1524.0,
            start_o: 0.0,
        }
    }
}

impl WorldConfig {
    pub fn start_district(&self) -> District {
        District::try_from(self.start_district).unwrap_or(District::Richland)
    }

    pub fn start_position(&self) -> Location {
        Location::new(self.start_x, self.start_y, self.start_z, self.start_o)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            name: "mxoemu".to_string(),
            user: "mxoemu".to_string(),
            password: String::new(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// Top-level server configuration, loaded from a JSON file with every
/// field defaulted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub transport: TransportConfig,
    pub world: WorldConfig,
    pub database: DatabaseConfig,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
