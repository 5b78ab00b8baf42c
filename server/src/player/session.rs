use std::time::{Duration, Instant};

use log::info;

use mxo_shared::proto::msg;
use mxo_shared::{Block, District, Location};

use super::events::{EventKind, EventParams, EventQueue};
use crate::session_index::SessionId;
use crate::store::CharacterRow;
use crate::transport::{DeliveredMessage, SessionTransport};
use crate::world::{ObjectBody, ObjectId};

/// Connection state machine, from handshake through in-world play to
/// teardown. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Handshake,
    Connected,
    WorldLoading,
    InWorld,
    Disconnecting,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Initial => "INITIAL",
            SessionState::Handshake => "HANDSHAKE",
            SessionState::Connected => "CONNECTED",
            SessionState::WorldLoading => "WORLD_LOADING",
            SessionState::InWorld => "IN_WORLD",
            SessionState::Disconnecting => "DISCONNECTING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// The fields whose change triggers a `PLAYER_STATE` delta to the
/// session's interest set.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StateSnapshot {
    position: Location,
    state_flags: u32,
    current_animation: u8,
    current_mood: u8,
    health_current: u16,
    inner_strength_current: u16,
}

/// One bound client: character identity and stats, the datagram channel,
/// the command inbox, and the timed-event queue.
///
/// The session refers to its player object by id only; the object graph
/// owns the object itself.
pub struct PlayerSession {
    pub id: SessionId,
    pub state: SessionState,

    pub character_id: u64,
    pub account_id: u32,
    pub handle: String,
    pub first_name: String,
    pub last_name: String,
    pub background: String,
    pub experience: u64,
    pub information: u64,
    pub district: District,
    pub position: Location,
    pub saved_position: Location,
    pub health_current: u16,
    pub health_max: u16,
    pub inner_strength_current: u16,
    pub inner_strength_max: u16,
    pub profession: u32,
    pub level: u8,
    pub alignment: u8,
    pub pvp: bool,
    pub current_animation: u8,
    pub current_mood: u8,
    pub emote_counter: u8,
    pub state_flags: u32,
    pub appearance: Vec<u8>,
    pub protocol_version: u8,

    pub transport: SessionTransport,
    pub events: EventQueue,
    pub object_id: Option<ObjectId>,
    /// In-order messages delivered by the transport, awaiting dispatch.
    pub pending: Vec<DeliveredMessage>,
    pub region_loaded: bool,
    pub dirty: bool,
    pub last_activity: Instant,

    last_emitted: Option<StateSnapshot>,
}

impl PlayerSession {
    pub fn new(
        id: SessionId,
        row: CharacterRow,
        transport: SessionTransport,
        now: Instant,
    ) -> Self {
        let district = District::try_from(row.district).unwrap_or(District::Richland);
        let position = Location::new(row.x, row.y, row.z, row.rotation);
        Self {
            id,
            state: SessionState::Initial,
            character_id: row.character_id,
            account_id: row.account_id,
            handle: row.handle,
            first_name: row.first_name,
            last_name: row.last_name,
            background: row.background,
            experience: row.experience,
            information: row.information,
            district,
            position,
            saved_position: position,
            health_current: row.health_current,
            health_max: row.health_max,
            inner_strength_current: row.inner_strength_current,
            inner_strength_max: row.inner_strength_max,
            profession: row.profession,
            level: row.level,
            alignment: row.alignment,
            pvp: row.pvp_flag,
            current_animation: 0,
            current_mood: 0,
            emote_counter: 0,
            state_flags: 0,
            appearance: row.appearance,
            protocol_version: mxo_shared::PROTOCOL_VERSION,
            transport,
            events: EventQueue::new(),
            object_id: None,
            pending: Vec::new(),
            region_loaded: false,
            dirty: false,
            last_activity: now,
            last_emitted: None,
        }
    }

    pub fn set_state(&mut self, state: SessionState) {
        if self.state == SessionState::Closed || self.state == state {
            return;
        }
        info!("{} ({}): {} -> {}", self.id, self.handle, self.state, state);
        self.state = state;
    }

    pub fn is_in_world(&self) -> bool {
        self.state == SessionState::InWorld
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// The body used to spawn this session's player object.
    pub fn player_body(&self) -> ObjectBody {
        ObjectBody::Player {
            character_id: self.character_id,
            handle: self.handle.clone(),
            level: self.level,
            profession: self.profession,
            alignment: self.alignment,
            pvp: self.pvp,
            current_animation: self.current_animation,
            current_mood: self.current_mood,
            health_current: self.health_current,
            health_max: self.health_max,
            inner_strength_current: self.inner_strength_current,
            inner_strength_max: self.inner_strength_max,
            appearance: self.appearance.clone(),
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            position: self.position,
            state_flags: self.state_flags,
            current_animation: self.current_animation,
            current_mood: self.current_mood,
            health_current: self.health_current,
            inner_strength_current: self.inner_strength_current,
        }
    }

    /// Returns a `PLAYER_STATE` block when the self-state changed since
    /// the last emission, advancing the emission snapshot.
    pub fn state_delta_block(&mut self) -> Option<Block> {
        let object_id = self.object_id?;
        let snapshot = self.snapshot();
        if self.last_emitted == Some(snapshot) {
            return None;
        }
        self.last_emitted = Some(snapshot);
        Some(Block::build(msg::PLAYER_STATE, |body| {
            body.write_u32(object_id);
            self.position.write(body);
            body.write_u32(self.state_flags);
            body.write_u8(self.current_animation);
            body.write_u8(self.current_mood);
            body.write_u16(self.health_current);
            body.write_u16(self.inner_strength_current);
        }))
    }

    /// Schedules the jackout event after the grace period; the player
    /// object stays in the world until it fires.
    pub fn schedule_jackout(&mut self, now: Instant, grace: Duration) {
        self.events.cancel(EventKind::Jackout);
        self.events
            .schedule(EventKind::Jackout, EventParams::None, now + grace);
    }

    /// The persistence snapshot for the character tables.
    pub fn to_character_row(&self) -> CharacterRow {
        CharacterRow {
            character_id: self.character_id,
            account_id: self.account_id,
            handle: self.handle.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            background: self.background.clone(),
            experience: self.experience,
            information: self.information,
            district: self.district.id(),
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
            rotation: self.position.o,
            health_current: self.health_current,
            health_max: self.health_max,
            inner_strength_current: self.inner_strength_current,
            inner_strength_max: self.inner_strength_max,
            profession: self.profession,
            level: self.level,
            alignment: self.alignment,
            pvp_flag: self.pvp,
            appearance: self.appearance.clone(),
        }
    }
}
