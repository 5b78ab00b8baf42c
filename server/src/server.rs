use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::info;
use thiserror::Error;

use mxo_shared::{CryptoEnvelope, CryptoError};

use crate::config::ServerConfig;
use crate::session_index::SessionTicket;
use crate::store::{MySqlStore, Store, StoreError, StoreWriter};
use crate::transport::{PacketChannel, PacketReceiver, ServerSocket};
use crate::world_server::WorldServer;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The game server process: owns the UDP socket, the ingress thread, the
/// store-writer thread, and the world core, and drives the world tick on
/// the calling thread.
///
/// Built as an explicit value and threaded through by reference; the
/// auth and margin servers interact with it only through
/// [`deposit_ticket`] and the store.
pub struct GameServer {
    config: ServerConfig,
    socket: ServerSocket,
    ingress: PacketReceiver,
    ingress_handle: Option<JoinHandle<()>>,
    store_writer: Option<StoreWriter>,
    world: WorldServer,
    envelope: CryptoEnvelope,
    stop: Arc<AtomicBool>,
}

impl GameServer {
    /// Connects to the configured database and binds the game port.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store: Arc<dyn Store> = Arc::new(MySqlStore::connect(&config.database)?);
        Self::with_store(config, store)
    }

    /// Brings the server up over any store implementation.
    pub fn with_store(config: ServerConfig, store: Arc<dyn Store>) -> Result<Self, ServerError> {
        let envelope = CryptoEnvelope::generate()?;
        let socket = ServerSocket::bind(config.listen.game)?;
        let (packet_sender, ingress) = PacketChannel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let ingress_handle = socket.spawn_ingress(packet_sender, Arc::clone(&stop));

        let store_writer = StoreWriter::spawn(Arc::clone(&store));
        let mut world = WorldServer::new(
            config.clone(),
            store,
            store_writer.handle(),
            Instant::now(),
        );
        world.load_world()?;

        Ok(Self {
            config,
            socket,
            ingress,
            ingress_handle: Some(ingress_handle),
            store_writer: Some(store_writer),
            world,
            envelope,
            stop,
        })
    }

    /// Flag polled between ticks; set it from another thread to begin an
    /// orderly shutdown.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Auth handoff: deposits the (character, account, key) tuple the
    /// next game handshake for this character must match.
    pub fn deposit_ticket(&self, ticket: SessionTicket) {
        self.world.deposit_ticket(ticket);
    }

    /// The signed public-key blob served to clients.
    pub fn public_key_data(&self) -> Vec<u8> {
        self.envelope.public_key_data()
    }

    /// Runs the world loop at the configured cadence until the stop flag
    /// is raised, then drains sessions and joins the worker threads.
    pub fn run(&mut self) {
        let tick_interval = Duration::from_millis(self.config.world.tick_ms);
        info!(
            "world loop running at {}ms cadence",
            self.config.world.tick_ms
        );

        while !self.stop.load(Ordering::Relaxed) {
            let tick_start = Instant::now();

            let mut handled = 0;
            while handled < self.config.world.ingress_budget {
                match self.ingress.try_receive() {
                    Ok(Some((addr, payload))) => {
                        self.world.handle_datagram(addr, &payload, tick_start);
                        handled += 1;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        self.stop.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }

            self.world.tick(tick_start);
            self.flush_outbound();

            // sleep out the cadence inside a bounded queue read, the only
            // blocking point allowed on this thread
            let elapsed = tick_start.elapsed();
            if elapsed < tick_interval {
                if let Ok(Some((addr, payload))) =
                    self.ingress.receive_timeout(tick_interval - elapsed)
                {
                    self.world.handle_datagram(addr, &payload, Instant::now());
                }
            }
        }

        self.shutdown();
    }

    fn flush_outbound(&mut self) {
        for (addr, wire) in self.world.drain_outbound() {
            self.socket.send_to(addr, &wire);
        }
    }

    fn shutdown(&mut self) {
        info!("stop requested, beginning shutdown");
        let tick_interval = Duration::from_millis(self.config.world.tick_ms);
        let deadline =
            Instant::now() + Duration::from_millis(self.config.world.shutdown_deadline_ms);

        self.world.begin_shutdown(Instant::now());
        while !self.world.all_closed() && Instant::now() < deadline {
            let now = Instant::now();
            self.world.tick(now);
            self.flush_outbound();
            std::thread::sleep(tick_interval);
        }
        if !self.world.all_closed() {
            info!("shutdown deadline passed, abandoning remaining sessions");
            self.world.force_close_all();
            self.world.tick(Instant::now());
            self.flush_outbound();
        }

        if let Some(writer) = self.store_writer.take() {
            writer.shutdown();
        }
        if let Some(handle) = self.ingress_handle.take() {
            let _ = handle.join();
        }
        info!("shutdown complete");
    }
}
