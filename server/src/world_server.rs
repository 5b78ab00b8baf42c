use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use mxo_shared::proto::msg;
use mxo_shared::{AuthResult, Block, District, Frame, Location, ObjectType, SESSION_KEY_LEN};

use crate::config::ServerConfig;
use crate::player::{
    perform_jackout, CommandContext, CommandDispatcher, CommandError, EventKind, EventParams,
    PlayerSession, SessionState,
};
use crate::session_index::{SessionError, SessionId, SessionIndex, SessionTicket};
use crate::store::{SaveOp, Store, StoreWriterHandle, StoreError};
use crate::transport::{SessionTransport, TransportError};
use crate::world::{
    DistrictCatalog, GameObject, ObjectBody, ObjectGraph, Outbox, Outgoing,
};

/// The single-threaded cooperative world core. One instance is driven by
/// the world thread at a fixed cadence; the socket thread feeds it parsed
/// datagrams through [`handle_datagram`], and [`drain_outbound`] hands
/// finished datagrams back for the socket.
///
/// The object graph lock is held across the whole tick body so every
/// broadcast emitted during a tick observes one consistent world
/// snapshot.
pub struct WorldServer {
    config: ServerConfig,
    index: Arc<SessionIndex>,
    graph: Arc<Mutex<ObjectGraph>>,
    districts: DistrictCatalog,
    dispatcher: CommandDispatcher,
    sessions: HashMap<SessionId, PlayerSession>,
    store: Arc<dyn Store>,
    store_writer: StoreWriterHandle,
    outbox: Outbox,
    raw_outbound: Vec<(SocketAddr, Vec<u8>)>,
    last_persist: Instant,
    shutting_down: bool,
}

impl WorldServer {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn Store>,
        store_writer: StoreWriterHandle,
        now: Instant,
    ) -> Self {
        let districts = DistrictCatalog::new(config.world.start_position());
        Self {
            config,
            index: Arc::new(SessionIndex::new()),
            graph: Arc::new(Mutex::new(ObjectGraph::new())),
            districts,
            dispatcher: CommandDispatcher::new(),
            sessions: HashMap::new(),
            store,
            store_writer,
            outbox: Outbox::new(),
            raw_outbound: Vec::new(),
            last_persist: now,
            shutting_down: false,
        }
    }

    pub fn index(&self) -> Arc<SessionIndex> {
        Arc::clone(&self.index)
    }

    pub fn graph(&self) -> Arc<Mutex<ObjectGraph>> {
        Arc::clone(&self.graph)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, id: SessionId) -> Option<&PlayerSession> {
        self.sessions.get(&id)
    }

    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(|s| s.state)
    }

    pub fn deposit_ticket(&self, ticket: SessionTicket) {
        self.index.deposit_ticket(ticket);
    }

    /// Loads the world tables: district markers into the catalog, static
    /// objects into the graph.
    pub fn load_world(&mut self) -> Result<(), StoreError> {
        let data = self.store.load_world(&self.config.world.world_name)?;
        for marker in &data.markers {
            let Ok(district) = District::try_from(marker.district_id) else {
                warn!("world marker names unknown district {}", marker.district_id);
                continue;
            };
            let position = Location::new(marker.x, marker.y, marker.z, marker.rotation);
            match marker.kind {
                crate::store::MarkerKind::Spawn => self.districts.add_spawn(district, position),
                crate::store::MarkerKind::Hardline => {
                    self.districts.add_hardline(district, position)
                }
            }
        }

        let mut graph = self.graph.lock();
        let mut count = 0usize;
        for row in &data.objects {
            let Ok(district) = District::try_from(row.district_id) else {
                warn!("world object names unknown district {}", row.district_id);
                continue;
            };
            let Ok(object_type) = ObjectType::try_from(row.object_type) else {
                warn!("world object has unknown type {:#06x}", row.object_type);
                continue;
            };
            let body = match ObjectBody::category_for(object_type) {
                "npc" => ObjectBody::Npc { template_id: 0 },
                "item" => ObjectBody::Item { item_id: 0 },
                "interactive" => ObjectBody::Interactive { interaction_id: 0 },
                "player" => {
                    warn!("world tables cannot spawn player objects");
                    continue;
                }
                _ => ObjectBody::Environment,
            };
            let object = GameObject::new(
                object_type,
                Location::new(row.x, row.y, row.z, row.rotation),
                district,
                row.name.clone(),
                body,
            );
            if graph.create(object, &mut self.outbox).is_ok() {
                count += 1;
            }
        }
        info!(
            "world {:?} loaded: {count} static objects",
            self.config.world.world_name
        );
        Ok(())
    }

    // Ingress

    /// Routes one raw datagram. Known peers go through their session
    /// transport; unknown peers must present a valid handshake.
    pub fn handle_datagram(&mut self, addr: SocketAddr, data: &[u8], now: Instant) {
        if let Some(id) = self.index.session_by_addr(&addr) {
            let Some(session) = self.sessions.get_mut(&id) else {
                return;
            };
            match session.transport.handle_datagram(data, now) {
                Ok(delivered) => {
                    if !delivered.is_empty() {
                        session.last_activity = now;
                    }
                    session.pending.extend(delivered);
                }
                Err(e) => debug!("{id}: dropped datagram from {addr}: {e}"),
            }
            return;
        }
        self.handle_handshake(addr, data, now);
    }

    fn handle_handshake(&mut self, addr: SocketAddr, data: &[u8], now: Instant) {
        if self.shutting_down {
            return;
        }
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("unbound peer {addr} sent undecodable datagram: {e}");
                return;
            }
        };
        if frame.message_type != msg::GAME_HANDSHAKE {
            debug!(
                "unbound peer {addr} sent type {:#06x} before handshake",
                frame.message_type
            );
            return;
        }
        let Some(block) = frame
            .blocks
            .iter()
            .find(|b| b.block_type == msg::GAME_HANDSHAKE)
        else {
            debug!("handshake from {addr} carries no handshake block");
            return;
        };

        let mut body = block.reader();
        let (character_id, key) = match (|| {
            let character_id = body.read_u64()?;
            let key = body.read_bytes(SESSION_KEY_LEN)?;
            Ok::<_, mxo_shared::CodecError>((character_id, key))
        })() {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("malformed handshake from {addr}: {e}");
                return;
            }
        };

        if self.index.is_full(self.config.world.max_connections) {
            self.reject_handshake(addr, AuthResult::ServerFull);
            return;
        }
        let ticket = match self.index.validate_ticket(character_id, &key) {
            Ok(ticket) => ticket,
            Err(SessionError::KeyMismatch { .. }) => {
                self.reject_handshake(addr, AuthResult::InvalidCredentials);
                return;
            }
            Err(_) => {
                self.reject_handshake(addr, AuthResult::InternalError);
                return;
            }
        };
        if self.index.session_by_character(character_id).is_some() {
            // the prior session stays intact
            info!("duplicate login refused for character {character_id} from {addr}");
            self.reject_handshake(addr, AuthResult::AlreadyLoggedIn);
            return;
        }

        let row = match self.store.load_character(character_id) {
            Ok(row) => row,
            Err(e) => {
                warn!("character {character_id} failed to load: {e}");
                self.reject_handshake(addr, AuthResult::InternalError);
                return;
            }
        };

        let mut transport =
            match SessionTransport::new(addr, self.config.transport.clone(), now) {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("transport setup failed for {addr}: {e}");
                    self.reject_handshake(addr, AuthResult::InternalError);
                    return;
                }
            };
        // run the handshake datagram through the transport so the
        // reliable sequence space starts correctly (and gets acked)
        if let Err(e) = transport.handle_datagram(data, now) {
            debug!("handshake replay through transport failed for {addr}: {e}");
            return;
        }

        let id = match self.index.bind(addr, character_id, &row.handle) {
            Ok(id) => id,
            Err(SessionError::AlreadyLoggedIn { .. }) => {
                self.reject_handshake(addr, AuthResult::AlreadyLoggedIn);
                return;
            }
            Err(e) => {
                warn!("bind failed for {addr}: {e}");
                self.reject_handshake(addr, AuthResult::InternalError);
                return;
            }
        };

        let mut session = PlayerSession::new(id, row, transport, now);
        session.set_state(SessionState::Handshake);

        let response = Block::build(msg::GAME_SESSION, |body| {
            body.write_u16(AuthResult::Success.code());
        });
        if let Err(e) = session
            .transport
            .send(msg::GAME_SESSION, vec![response], true, now)
        {
            warn!("{id}: session response failed: {e}");
        }
        session.transport.bind_session_key(ticket.session_key);
        session.set_state(SessionState::Connected);
        info!(
            "{id}: character {character_id} ({}) connected from {addr}",
            session.handle
        );
        self.sessions.insert(id, session);
    }

    fn reject_handshake(&mut self, addr: SocketAddr, result: AuthResult) {
        let block = Block::build(msg::GAME_SESSION, |body| {
            body.write_u16(result.code());
        });
        let frame = Frame::new(msg::GAME_SESSION, vec![block]);
        self.raw_outbound.push((addr, frame.encode()));
    }

    // The tick body

    /// One world tick: events, commands, state deltas, housekeeping,
    /// outbox flush, transport timers, and periodic persistence.
    pub fn tick(&mut self, now: Instant) {
        let tick_started = Instant::now();
        let graph_arc = Arc::clone(&self.graph);
        let mut graph = graph_arc.lock();
        let jackout_grace = Duration::from_millis(self.config.world.jackout_grace_ms);

        let mut session_ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        session_ids.sort();

        // per-session: timed events, then commands, then self-state delta
        for &id in &session_ids {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };

            fire_due_events(session, &mut graph, &mut self.outbox, &self.store_writer, now);

            let pending = std::mem::take(&mut session.pending);
            for message in pending {
                match message.message_type {
                    msg::PLAYER_COMMAND => {
                        for block in &message.blocks {
                            if block.block_type != msg::PLAYER_COMMAND {
                                continue;
                            }
                            let mut ctx = CommandContext {
                                session: &mut *session,
                                graph: &mut *graph,
                                districts: &self.districts,
                                outbox: &mut self.outbox,
                                now,
                                jackout_grace,
                            };
                            match self.dispatcher.dispatch(&mut ctx, &block.data) {
                                Ok(()) => {}
                                Err(CommandError::UnknownCommand { id: command }) => {
                                    warn!("{id}: unknown command {command:#06x}, dropped");
                                }
                                Err(e) => debug!("{id}: command aborted: {e}"),
                            }
                        }
                    }
                    msg::PLAYER_MOVEMENT => {
                        for block in &message.blocks {
                            apply_movement(session, &mut graph, &block.data);
                        }
                    }
                    other => debug!("{id}: unhandled message type {other:#06x}"),
                }
            }

            // commands may schedule events for this instant; they still
            // run before the tick returns
            fire_due_events(session, &mut graph, &mut self.outbox, &self.store_writer, now);

            if session.is_in_world() {
                if let Some(block) = session.state_delta_block() {
                    self.outbox.to_district(
                        session.district,
                        Some(id),
                        msg::PLAYER_STATE,
                        vec![block],
                        true,
                    );
                }
            }
        }

        // housekeeping: closed sessions leave every index, with their
        // player object despawned and a final persistence write issued
        let closed: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::Closed)
            .map(|(id, _)| *id)
            .collect();
        for id in closed {
            if let Some(mut session) = self.sessions.remove(&id) {
                if session.object_id.is_some() {
                    perform_jackout(&mut session, &mut graph, &mut self.outbox);
                }
                self.index.unbind(id);
                self.store_writer
                    .enqueue(SaveOp::Character(session.to_character_row()));
                info!("{id}: removed ({})", session.handle);
            }
        }

        // flush the outbox through the session transports
        let outgoing = self.outbox.drain();
        let mut leftovers = Vec::new();
        for item in outgoing {
            self.route(item, now, &mut leftovers);
        }
        self.outbox.requeue(leftovers);

        // transport timers: retransmits, acks, keepalives, timeouts
        for &id in &session_ids {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            session.transport.service(now);
            if let Some(fault) = session.transport.take_fault() {
                warn!("{id}: transport fault {fault:?}");
                perform_jackout(session, &mut graph, &mut self.outbox);
                // slots are abandoned, nothing left to wait for
                session.set_state(SessionState::Closed);
            } else if session.state == SessionState::Disconnecting
                && session.transport.outstanding() == 0
            {
                session.set_state(SessionState::Closed);
            }

            let peer = session.transport.peer();
            for wire in session.transport.take_outbound() {
                self.raw_outbound.push((peer, wire));
            }
        }

        // periodic persistence for dirty sessions; skipped when the tick
        // ran over its soft budget
        let over_budget =
            tick_started.elapsed() > Duration::from_millis(self.config.world.tick_ms);
        if over_budget {
            warn!(
                "tick over budget ({}ms), skipping persistence pass",
                tick_started.elapsed().as_millis()
            );
        } else if now.duration_since(self.last_persist)
            >= Duration::from_millis(self.config.world.persist_interval_ms)
        {
            self.last_persist = now;
            for session in self.sessions.values_mut() {
                if session.dirty {
                    session.dirty = false;
                    self.store_writer
                        .enqueue(SaveOp::Character(session.to_character_row()));
                }
            }
        }
    }

    fn route(&mut self, item: Outgoing, now: Instant, leftovers: &mut Vec<Outgoing>) {
        let (targets, message_type, blocks, reliable): (Vec<SessionId>, u16, Vec<Block>, bool) =
            match item {
                Outgoing::ToSession {
                    session,
                    message_type,
                    blocks,
                    reliable,
                } => (vec![session], message_type, blocks, reliable),
                Outgoing::ToHandle {
                    ref handle,
                    message_type,
                    ref blocks,
                    reliable,
                } => {
                    let Some(id) = self.index.session_by_handle(handle) else {
                        debug!("dropping message for unknown handle {handle:?}");
                        return;
                    };
                    (vec![id], message_type, blocks.clone(), reliable)
                }
                Outgoing::ToDistrict {
                    district,
                    except,
                    message_type,
                    ref blocks,
                    reliable,
                } => {
                    let targets = self
                        .sessions
                        .iter()
                        .filter(|(id, s)| {
                            Some(**id) != except
                                && s.object_id.is_some()
                                && s.district == district
                        })
                        .map(|(id, _)| *id)
                        .collect();
                    (targets, message_type, blocks.clone(), reliable)
                }
                Outgoing::ToAll {
                    except,
                    message_type,
                    ref blocks,
                    reliable,
                } => {
                    let targets = self
                        .sessions
                        .iter()
                        .filter(|(id, s)| Some(**id) != except && s.object_id.is_some())
                        .map(|(id, _)| *id)
                        .collect();
                    (targets, message_type, blocks.clone(), reliable)
                }
            };

        let mut targets = targets;
        targets.sort();
        for id in targets {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if session.state == SessionState::Closed {
                continue;
            }
            match session
                .transport
                .send(message_type, blocks.clone(), reliable, now)
            {
                Ok(()) => {}
                Err(TransportError::WindowFull { .. }) => {
                    // retried on a later tick once acks free the window
                    leftovers.push(Outgoing::ToSession {
                        session: id,
                        message_type,
                        blocks: blocks.clone(),
                        reliable,
                    });
                }
                Err(e) => debug!("{id}: send failed: {e}"),
            }
        }
    }

    /// Datagrams ready for the socket.
    pub fn drain_outbound(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut self.raw_outbound)
    }

    // Shutdown

    /// Refuses new sessions and walks every live session into teardown.
    pub fn begin_shutdown(&mut self, _now: Instant) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("shutdown: draining {} sessions", self.sessions.len());
        let graph_arc = Arc::clone(&self.graph);
        let mut graph = graph_arc.lock();
        for session in self.sessions.values_mut() {
            if session.state != SessionState::Disconnecting
                && session.state != SessionState::Closed
            {
                perform_jackout(session, &mut graph, &mut self.outbox);
            }
        }
    }

    pub fn all_closed(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Abandons whatever is still pending once the shutdown deadline
    /// passes.
    pub fn force_close_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.set_state(SessionState::Closed);
        }
    }
}

fn fire_due_events(
    session: &mut PlayerSession,
    graph: &mut ObjectGraph,
    outbox: &mut Outbox,
    store_writer: &StoreWriterHandle,
    now: Instant,
) {
    for event in session.events.take_due(now) {
        match event.kind {
            EventKind::Jackout => {
                info!("{}: jackout grace expired", session.id);
                perform_jackout(session, graph, outbox);
            }
            EventKind::Teleport => {
                if let EventParams::Teleport { district, position } = event.params {
                    session.district = district;
                    session.position = position;
                    session.mark_dirty();
                    if let Some(object_id) = session.object_id {
                        let _ = graph.move_object(object_id, position, district, outbox);
                    }
                    store_writer.enqueue(SaveOp::Position {
                        character_id: session.character_id,
                        district: district.id(),
                        position,
                    });
                }
            }
            EventKind::AbilityEnd => {
                session.current_animation = 0;
            }
        }
    }
}

fn apply_movement(session: &mut PlayerSession, graph: &mut ObjectGraph, data: &[u8]) {
    if !session.is_in_world() {
        return;
    }
    let mut reader = mxo_shared::ByteBuffer::from_bytes(data);
    let Ok(position) = Location::read(&mut reader) else {
        debug!("{}: malformed movement block", session.id);
        return;
    };
    session.position = position;
    if let Some(object_id) = session.object_id {
        if let Some(object) = graph.get_mut(object_id) {
            object.position = position;
        }
    }
    session.mark_dirty();
}
