//! Shared harness for driving a `WorldServer` and a client-side
//! transport against each other without sockets or sleeps. Tests own the
//! clock: every call takes an explicit instant.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mxo_server::config::ServerConfig;
use mxo_server::store::{CharacterRow, MemoryStore, StoreWriter};
use mxo_server::transport::{DeliveredMessage, SessionTransport};
use mxo_server::{SessionTicket, WorldServer};
use mxo_shared::proto::msg;
use mxo_shared::{Block, ByteBuffer, SESSION_KEY_LEN};

pub const SESSION_KEY: [u8; SESSION_KEY_LEN] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
    0x0F,
];

pub struct TestClient {
    pub addr: SocketAddr,
    pub transport: SessionTransport,
    pub inbox: Vec<DeliveredMessage>,
}

impl TestClient {
    pub fn new(addr: &str, config: &ServerConfig, now: Instant) -> Self {
        let addr: SocketAddr = addr.parse().expect("test addr");
        Self {
            addr,
            transport: SessionTransport::new(addr, config.transport.clone(), now)
                .expect("client transport"),
            inbox: Vec::new(),
        }
    }

    pub fn handshake_block(character_id: u64, key: &[u8; SESSION_KEY_LEN]) -> Block {
        Block::build(msg::GAME_HANDSHAKE, |body| {
            body.write_u64(character_id);
            body.append(key);
        })
    }

    /// Queues a `PLAYER_COMMAND` whose body is the raw command bytes.
    pub fn send_command(&mut self, body: &[u8], now: Instant) {
        let block = Block::new(msg::PLAYER_COMMAND, body.to_vec());
        self.transport
            .send(msg::PLAYER_COMMAND, vec![block], true, now)
            .expect("command send");
    }

    /// Pushes everything the client has queued into the world server.
    pub fn flush_to(&mut self, world: &mut WorldServer, now: Instant) {
        for wire in self.transport.take_outbound() {
            world.handle_datagram(self.addr, &wire, now);
        }
    }

    /// Feeds server datagrams addressed to this client back through the
    /// client transport, collecting deliveries in `inbox`.
    pub fn absorb(&mut self, outbound: &[(SocketAddr, Vec<u8>)], now: Instant) {
        for (addr, wire) in outbound {
            if *addr != self.addr {
                continue;
            }
            if let Ok(delivered) = self.transport.handle_datagram(wire, now) {
                self.inbox.extend(delivered);
            }
        }
    }

    pub fn take_inbox(&mut self) -> Vec<DeliveredMessage> {
        std::mem::take(&mut self.inbox)
    }
}

pub struct TestWorld {
    pub world: WorldServer,
    pub store: Arc<MemoryStore>,
    pub writer: StoreWriter,
    pub config: ServerConfig,
    pub now: Instant,
    /// Server datagrams not yet delivered to their addressee; kept so a
    /// single-client pump never drops another client's traffic.
    mailbox: Vec<(SocketAddr, Vec<u8>)>,
}

impl TestWorld {
    pub fn new() -> Self {
        let config = ServerConfig::default();
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone());
        let now = Instant::now();
        let mut world = WorldServer::new(config.clone(), store.clone(), writer.handle(), now);
        world.load_world().expect("memory world loads");
        Self {
            world,
            store,
            writer,
            config,
            now,
            mailbox: Vec::new(),
        }
    }

    fn deliver(&mut self, client: &mut TestClient) {
        let mut kept = Vec::new();
        let mut mine = Vec::new();
        for entry in self.mailbox.drain(..) {
            if entry.0 == client.addr {
                mine.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.mailbox = kept;
        client.absorb(&mine, self.now);
    }

    pub fn seed_character(&self, character_id: u64, handle: &str) {
        self.store
            .seed_character(CharacterRow::sample(character_id, handle));
        self.world.deposit_ticket(SessionTicket {
            character_id,
            account_id: 1,
            session_key: SESSION_KEY,
        });
    }

    pub fn client(&self, addr: &str) -> TestClient {
        TestClient::new(addr, &self.config, self.now)
    }

    /// Performs the S1 handshake for a seeded character and returns the
    /// connected client with its session key bound.
    pub fn connect(&mut self, addr: &str, character_id: u64) -> TestClient {
        let mut client = self.client(addr);
        let now = self.now;
        client
            .transport
            .send(
                msg::GAME_HANDSHAKE,
                vec![TestClient::handshake_block(character_id, &SESSION_KEY)],
                true,
                now,
            )
            .expect("handshake send");
        client.flush_to(&mut self.world, now);
        self.world.tick(now);
        let outbound = self.world.drain_outbound();
        self.mailbox.extend(outbound);
        self.deliver(&mut client);
        client.transport.bind_session_key(SESSION_KEY);
        client
    }

    /// Runs one exchange round: client to world, tick, world to client,
    /// both sides' timers. Advances the shared clock by one tick.
    pub fn pump(&mut self, client: &mut TestClient) {
        self.now += Duration::from_millis(self.config.world.tick_ms);
        let now = self.now;
        client.flush_to(&mut self.world, now);
        self.world.tick(now);
        let outbound = self.world.drain_outbound();
        self.mailbox.extend(outbound);
        self.deliver(client);
        client.transport.service(now);
        client.flush_to(&mut self.world, now);
    }

    /// One exchange round with two clients attached to the same world.
    pub fn pump_pair(&mut self, a: &mut TestClient, b: &mut TestClient) {
        self.now += Duration::from_millis(self.config.world.tick_ms);
        let now = self.now;
        a.flush_to(&mut self.world, now);
        b.flush_to(&mut self.world, now);
        self.world.tick(now);
        let outbound = self.world.drain_outbound();
        self.mailbox.extend(outbound);
        self.deliver(a);
        self.deliver(b);
        a.transport.service(now);
        b.transport.service(now);
        a.flush_to(&mut self.world, now);
        b.flush_to(&mut self.world, now);
    }

    /// Advances time without traffic, letting timers fire.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Drives a connected client into the world: ready-for-spawn, then
    /// region-loaded.
    pub fn enter_world(&mut self, client: &mut TestClient) {
        client.send_command(&[0x01], self.now); // READY_FOR_SPAWN
        self.pump(client);
        client.send_command(&[0x0B], self.now); // REGION_LOADED
        self.pump(client);
        self.pump(client);
    }
}

/// Reads the result code out of a `GAME_SESSION` message.
pub fn session_result(message: &DeliveredMessage) -> Option<u16> {
    let block = message
        .blocks
        .iter()
        .find(|b| b.block_type == msg::GAME_SESSION)?;
    let mut reader: ByteBuffer = block.reader();
    reader.read_u16().ok()
}
