//! # MxO Server
//! The Matrix Online emulator's game server core: the reliable datagram
//! transport, the per-session state machine and command dispatch, the
//! district object graph with interest-set broadcast, the world tick,
//! and the persistence adapter.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub mod config;
pub mod player;
pub mod session_index;
pub mod store;
pub mod transport;
pub mod world;

mod server;
mod world_server;

pub use config::ServerConfig;
pub use server::{GameServer, ServerError};
pub use session_index::{SessionError, SessionId, SessionIndex, SessionTicket};
pub use world_server::WorldServer;
