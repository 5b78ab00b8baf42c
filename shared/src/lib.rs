//! # MxO Shared
//! Wire protocol, byte codec, and crypto shared between the Matrix Online
//! emulator's game transport and its auth/margin siblings.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod byte_buffer;
mod compress;
mod crypto;
mod frame;
mod location;
pub mod proto;
mod sequence;
mod sequence_list;

pub use byte_buffer::{ByteBuffer, CodecError};
pub use compress::{CompressError, Decoder, Encoder};
pub use crypto::{
    decrypt_session, encrypt_session, generate_session_key, CryptoEnvelope, CryptoError, KeySize,
    SESSION_KEY_LEN, SESSION_NONCE_LEN,
};
pub use frame::{
    decode_blocks, encode_blocks, Block, Frame, FrameError, FrameHeader, BLOCK_HEADER_LEN,
    COMMON_HEADER_LEN, DEFAULT_MTU, GAME_HEADER_LEN, HEADERS_LEN,
};
pub use location::Location;
pub use proto::{
    AuthResult, ChatType, District, ObjectType, ProtoError, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
pub use sequence::{sequence_greater_than, sequence_less_than, wrapping_diff};
pub use sequence_list::{SequenceError, SequenceList};
