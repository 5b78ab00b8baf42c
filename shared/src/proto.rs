use thiserror::Error;

/// First byte of every datagram.
pub const PROTOCOL_MAGIC: u8 = 0xA5;
/// Current protocol version carried in the common header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Errors raised when a wire discriminant does not name a known value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    #[error("unknown district id {0:#04x}")]
    UnknownDistrict(u8),
    #[error("unknown chat type {0:#04x}")]
    UnknownChatType(u8),
    #[error("unknown object type {0:#06x}")]
    UnknownObjectType(u16),
    #[error("unknown animation id {0:#04x}")]
    UnknownAnimation(u8),
    #[error("unknown mood id {0:#04x}")]
    UnknownMood(u8),
}

/// Message types carried in the common header. Ranges are reserved per
/// server: authentication 0x0001-0x00FF, game 0x1001-0x10FF, margin
/// 0x2001-0x20FF.
pub mod msg {
    // Authentication stream (consumed here only for result codes)
    pub const AUTH_CHALLENGE: u16 = 0x0001;
    pub const AUTH_RESPONSE: u16 = 0x0002;
    pub const AUTH_RESULT: u16 = 0x0003;

    // Game server
    pub const GAME_HANDSHAKE: u16 = 0x1001;
    pub const GAME_SESSION: u16 = 0x1002;
    pub const PLAYER_MOVEMENT: u16 = 0x1003;
    pub const PLAYER_STATE: u16 = 0x1004;
    pub const WORLD_STATE: u16 = 0x1005;
    pub const OBJECT_CREATE: u16 = 0x1006;
    pub const OBJECT_UPDATE: u16 = 0x1007;
    pub const OBJECT_DESTROY: u16 = 0x1008;
    pub const CHAT_MESSAGE: u16 = 0x1009;
    pub const PLAYER_COMMAND: u16 = 0x100A;
    pub const REGION_LOAD: u16 = 0x100B;
    pub const JACKOUT_REQUEST: u16 = 0x100C;
    pub const JACKOUT_RESPONSE: u16 = 0x100D;
    // Transport-level types, kept at the top of the game range
    pub const GAME_ACK: u16 = 0x10FD;
    pub const GAME_PING: u16 = 0x10FE;
    pub const GAME_PONG: u16 = 0x10FF;

    // Margin server
    pub const MISSION_LIST_REQUEST: u16 = 0x2001;
    pub const MISSION_LIST_RESPONSE: u16 = 0x2002;

    /// Handshake-phase types are the only ones ever sent in the clear once
    /// a session key is bound.
    pub fn is_handshake(message_type: u16) -> bool {
        message_type == GAME_HANDSHAKE || message_type == GAME_SESSION
    }

    pub fn is_game_range(message_type: u16) -> bool {
        (0x1001..=0x10FF).contains(&message_type)
    }
}

/// Game-header flag bits.
pub mod flags {
    pub const RELIABLE: u8 = 0x01;
    pub const ENCRYPTED: u8 = 0x02;
    pub const COMPRESSED: u8 = 0x04;
    pub const FRAGMENT: u8 = 0x08;
}

/// Byte-keyed player command ids (0x00-0xFF).
pub mod cmd {
    pub const READY_FOR_SPAWN: u8 = 0x01;
    pub const CHAT: u8 = 0x02;
    pub const WHISPER: u8 = 0x03;
    pub const STOP_ANIMATION: u8 = 0x04;
    pub const START_ANIMATION: u8 = 0x05;
    pub const CHANGE_MOOD: u8 = 0x06;
    pub const PERFORM_EMOTE: u8 = 0x07;
    pub const DYNAMIC_OBJ_INTERACTION: u8 = 0x08;
    pub const STATIC_OBJ_INTERACTION: u8 = 0x09;
    pub const JUMP: u8 = 0x0A;
    pub const REGION_LOADED: u8 = 0x0B;
    pub const READY_FOR_WORLD_CHANGE: u8 = 0x0C;
    pub const WHO: u8 = 0x0D;
    pub const WHERE_AM_I: u8 = 0x0E;
    pub const GET_PLAYER_DETAILS: u8 = 0x0F;
    pub const GET_BACKGROUND: u8 = 0x10;
    pub const SET_BACKGROUND: u8 = 0x11;
    pub const HARDLINE_TELEPORT: u8 = 0x12;
    pub const OBJECT_SELECTED: u8 = 0x13;
    pub const JACKOUT_REQUEST: u8 = 0x14;
    pub const JACKOUT_FINISHED: u8 = 0x15;
}

/// Short-keyed player command ids (0x0100 and up).
pub mod short_cmd {
    pub const ABILITY_USE: u16 = 0x0100;
    pub const TRADE_REQUEST: u16 = 0x0101;
    pub const TRADE_ACCEPT: u16 = 0x0102;
    pub const TRADE_DECLINE: u16 = 0x0103;
    pub const TRADE_CANCEL: u16 = 0x0104;
    pub const TRADE_ADD_ITEM: u16 = 0x0105;
    pub const TRADE_REMOVE_ITEM: u16 = 0x0106;
    pub const TRADE_SET_INFO: u16 = 0x0107;
    pub const TRADE_CONFIRM: u16 = 0x0108;
    pub const GROUP_INVITE: u16 = 0x0109;
    pub const GROUP_ACCEPT: u16 = 0x010A;
    pub const GROUP_DECLINE: u16 = 0x010B;
    pub const GROUP_LEAVE: u16 = 0x010C;
    pub const GROUP_KICK: u16 = 0x010D;
    pub const GROUP_PROMOTE: u16 = 0x010E;
    pub const GROUP_DISBAND: u16 = 0x010F;
}

/// Result codes for handshake and authentication responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AuthResult {
    Success = 0x00,
    InvalidCredentials = 0x01,
    AccountBanned = 0x02,
    ServerFull = 0x03,
    AlreadyLoggedIn = 0x04,
    InvalidClientVersion = 0x05,
    InternalError = 0x06,
    AccountSuspended = 0x07,
    NoAccess = 0x08,
    Maintenance = 0x09,
}

impl AuthResult {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Chat message channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChatType {
    Say = 0x00,
    Yell = 0x01,
    Whisper = 0x02,
    Group = 0x03,
    Faction = 0x04,
    System = 0x05,
    Emote = 0x06,
    Ooc = 0x07,
    Broadcast = 0x08,
}

impl TryFrom<u8> for ChatType {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, ProtoError> {
        match value {
            0x00 => Ok(Self::Say),
            0x01 => Ok(Self::Yell),
            0x02 => Ok(Self::Whisper),
            0x03 => Ok(Self::Group),
            0x04 => Ok(Self::Faction),
            0x05 => Ok(Self::System),
            0x06 => Ok(Self::Emote),
            0x07 => Ok(Self::Ooc),
            0x08 => Ok(Self::Broadcast),
            other => Err(ProtoError::UnknownChatType(other)),
        }
    }
}

/// The twelve fixed districts of the city.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum District {
    Richland = 0x01,
    Downtown = 0x02,
    Westview = 0x03,
    International = 0x04,
    Ueno = 0x05,
    Stamos = 0x06,
    Tabor = 0x07,
    Edgewater = 0x08,
    Gracy = 0x09,
    Historic = 0x0A,
    Center = 0x0B,
    Kedemoth = 0x0C,
}

impl District {
    pub const ALL: [District; 12] = [
        District::Richland,
        District::Downtown,
        District::Westview,
        District::International,
        District::Ueno,
        District::Stamos,
        District::Tabor,
        District::Edgewater,
        District::Gracy,
        District::Historic,
        District::Center,
        District::Kedemoth,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            District::Richland => "Richland",
            District::Downtown => "Downtown",
            District::Westview => "Westview",
            District::International => "International",
            District::Ueno => "Ueno",
            District::Stamos => "Stamos",
            District::Tabor => "Tabor",
            District::Edgewater => "Edgewater",
            District::Gracy => "Gracy",
            District::Historic => "Historic",
            District::Center => "Center",
            District::Kedemoth => "Kedemoth",
        }
    }
}

impl TryFrom<u8> for District {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, ProtoError> {
        District::ALL
            .into_iter()
            .find(|d| d.id() == value)
            .ok_or(ProtoError::UnknownDistrict(value))
    }
}

impl std::fmt::Display for District {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire object type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ObjectType {
    None = 0x0000,
    Player = 0x0001,
    Npc = 0x0002,
    Item = 0x0003,
    Container = 0x0004,
    Hardline = 0x0005,
    Door = 0x0006,
    Computer = 0x0007,
    MissionGiver = 0x0008,
    Vendor = 0x0009,
    Trainer = 0x000A,
    Interactive = 0x000B,
    Elevator = 0x000C,
    Portal = 0x000D,
}

impl ObjectType {
    pub fn tag(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for ObjectType {
    type Error = ProtoError;

    fn try_from(value: u16) -> Result<Self, ProtoError> {
        match value {
            0x0000 => Ok(Self::None),
            0x0001 => Ok(Self::Player),
            0x0002 => Ok(Self::Npc),
            0x0003 => Ok(Self::Item),
            0x0004 => Ok(Self::Container),
            0x0005 => Ok(Self::Hardline),
            0x0006 => Ok(Self::Door),
            0x0007 => Ok(Self::Computer),
            0x0008 => Ok(Self::MissionGiver),
            0x0009 => Ok(Self::Vendor),
            0x000A => Ok(Self::Trainer),
            0x000B => Ok(Self::Interactive),
            0x000C => Ok(Self::Elevator),
            0x000D => Ok(Self::Portal),
            other => Err(ProtoError::UnknownObjectType(other)),
        }
    }
}

/// Player state flag bits carried in object state bitsets and
/// `PLAYER_STATE` deltas.
pub mod player_state {
    pub const COMBAT: u32 = 0x0001;
    pub const SITTING: u32 = 0x0002;
    pub const DEAD: u32 = 0x0004;
    pub const INVISIBLE: u32 = 0x0008;
    pub const PVP_ENABLED: u32 = 0x0010;
    pub const RUNNING: u32 = 0x0020;
    pub const STEALTHED: u32 = 0x0040;
    pub const AFK: u32 = 0x0080;
}

pub const ANIMATION_MAX: u8 = 0x13; // ANIM_MEDITATE
pub const MOOD_MAX: u8 = 0x0A; // MOOD_SUSPICIOUS

/// Validates an animation id against the client's table (STAND..MEDITATE).
pub fn animation_valid(id: u8) -> bool {
    id <= ANIMATION_MAX
}

/// Validates a mood id against the client's table (NEUTRAL..SUSPICIOUS).
pub fn mood_valid(id: u8) -> bool {
    id <= MOOD_MAX
}

/// Profession ids.
pub mod profession {
    pub const NONE: u32 = 0x00;
    pub const CODER: u32 = 0x01;
    pub const HACKER: u32 = 0x02;
    pub const OPERATIVE: u32 = 0x03;
    pub const REDPILL: u32 = 0x04;
}

/// Alignment ids.
pub mod alignment {
    pub const NEUTRAL: u8 = 0x00;
    pub const ZION: u8 = 0x01;
    pub const MACHINE: u8 = 0x02;
    pub const MEROVINGIAN: u8 = 0x03;
}
