use thiserror::Error;

use crate::byte_buffer::{ByteBuffer, CodecError};
use crate::proto::{flags, PROTOCOL_MAGIC, PROTOCOL_VERSION};

/// Common header: magic, version, message type, total length.
pub const COMMON_HEADER_LEN: usize = 8;
/// Game header: sequence, ack, flags, block count.
pub const GAME_HEADER_LEN: usize = 6;
/// Both fixed headers.
pub const HEADERS_LEN: usize = COMMON_HEADER_LEN + GAME_HEADER_LEN;
/// Per-block type + length prefix.
pub const BLOCK_HEADER_LEN: usize = 4;
/// Default datagram budget; payloads past `mtu - headers` fragment.
pub const DEFAULT_MTU: usize = 1200;

/// Errors raised while decoding a datagram. All of them are datagram-local:
/// the offending datagram is dropped and the session carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("datagram of {len} bytes is shorter than the fixed headers")]
    TooShort { len: usize },

    #[error("bad magic byte {found:#04x}")]
    BadMagic { found: u8 },

    #[error("unsupported protocol version {found}")]
    BadVersion { found: u8 },

    #[error("total length field {declared} does not match datagram of {actual} bytes")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("block {index} of {count} overruns its containing datagram")]
    BlockOverrun { index: u8, count: u8 },

    #[error("{trailing} trailing bytes after {count} declared blocks")]
    TrailingBytes { trailing: usize, count: u8 },

    #[error("malformed block data: {0}")]
    Codec(#[from] CodecError),
}

/// One typed block inside a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_type: u16,
    pub data: Vec<u8>,
}

impl Block {
    pub fn new(block_type: u16, data: Vec<u8>) -> Self {
        Self { block_type, data }
    }

    /// A block whose body is produced by the given writer closure.
    pub fn build(block_type: u16, write: impl FnOnce(&mut ByteBuffer)) -> Self {
        let mut body = ByteBuffer::new();
        write(&mut body);
        Self {
            block_type,
            data: body.into_bytes(),
        }
    }

    pub fn reader(&self) -> ByteBuffer {
        ByteBuffer::from_bytes(&self.data)
    }
}

/// A decoded datagram: common header + game header + blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: u16,
    pub sequence: u16,
    pub ack: u16,
    pub flags: u8,
    pub blocks: Vec<Block>,
}

impl Frame {
    pub fn new(message_type: u16, blocks: Vec<Block>) -> Self {
        Self {
            message_type,
            sequence: 0,
            ack: 0,
            flags: 0,
            blocks,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.flags & flags::RELIABLE != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & flags::COMPRESSED != 0
    }

    pub fn is_fragment(&self) -> bool {
        self.flags & flags::FRAGMENT != 0
    }

    /// Serializes the complete plaintext datagram.
    pub fn encode(&self) -> Vec<u8> {
        let payload = encode_blocks(&self.blocks);
        self.encode_with_payload(&payload)
    }

    /// Serializes headers around an already-prepared payload (which may be
    /// ciphertext or compressed bytes; the block count still describes the
    /// plaintext blocks).
    pub fn encode_with_payload(&self, payload: &[u8]) -> Vec<u8> {
        let total = (HEADERS_LEN + payload.len()) as u32;
        let mut out = ByteBuffer::with_capacity(total as usize);
        out.write_u8(PROTOCOL_MAGIC);
        out.write_u8(PROTOCOL_VERSION);
        out.write_u16(self.message_type);
        out.write_u32(total);
        out.write_u16(self.sequence);
        out.write_u16(self.ack);
        out.write_u8(self.flags);
        out.write_u8(self.blocks.len() as u8);
        out.append(payload);
        out.into_bytes()
    }

    /// Decodes a plaintext datagram, validating magic, version, the total
    /// length, and that the declared blocks exactly tile the payload.
    pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
        let (header, payload) = FrameHeader::peek(data)?;
        let blocks = decode_blocks(payload, header.block_count)?;
        Ok(Frame {
            message_type: header.message_type,
            sequence: header.sequence,
            ack: header.ack,
            flags: header.flags,
            blocks,
        })
    }
}

/// The two fixed headers, parsed without touching the payload. The
/// transport uses this to inspect sequence numbers and flags before
/// decrypting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: u16,
    pub total_length: u32,
    pub sequence: u16,
    pub ack: u16,
    pub flags: u8,
    pub block_count: u8,
}

impl FrameHeader {
    pub fn peek(data: &[u8]) -> Result<(FrameHeader, &[u8]), FrameError> {
        if data.len() < HEADERS_LEN {
            return Err(FrameError::TooShort { len: data.len() });
        }
        let mut reader = ByteBuffer::from_bytes(&data[..HEADERS_LEN]);
        let magic = reader.read_u8()?;
        if magic != PROTOCOL_MAGIC {
            return Err(FrameError::BadMagic { found: magic });
        }
        let version = reader.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(FrameError::BadVersion { found: version });
        }
        let message_type = reader.read_u16()?;
        let total_length = reader.read_u32()?;
        if total_length as usize != data.len() {
            return Err(FrameError::LengthMismatch {
                declared: total_length,
                actual: data.len(),
            });
        }
        let sequence = reader.read_u16()?;
        let ack = reader.read_u16()?;
        let flags = reader.read_u8()?;
        let block_count = reader.read_u8()?;
        Ok((
            FrameHeader {
                message_type,
                total_length,
                sequence,
                ack,
                flags,
                block_count,
            },
            &data[HEADERS_LEN..],
        ))
    }

    pub fn is_reliable(&self) -> bool {
        self.flags & flags::RELIABLE != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }
}

/// Serializes blocks as (type, length, data) triples.
pub fn encode_blocks(blocks: &[Block]) -> Vec<u8> {
    let mut out = ByteBuffer::new();
    for block in blocks {
        out.write_u16(block.block_type);
        out.write_u16(block.data.len() as u16);
        out.append(&block.data);
    }
    out.into_bytes()
}

/// Parses exactly `count` blocks out of `payload`; any mismatch between
/// the declared lengths and the payload extent is a malformed frame.
pub fn decode_blocks(payload: &[u8], count: u8) -> Result<Vec<Block>, FrameError> {
    let mut reader = ByteBuffer::from_bytes(payload);
    let mut blocks = Vec::with_capacity(count as usize);
    for index in 0..count {
        if reader.remaining() < BLOCK_HEADER_LEN {
            return Err(FrameError::BlockOverrun { index, count });
        }
        let block_type = reader.read_u16()?;
        let length = reader.read_u16()? as usize;
        if reader.remaining() < length {
            return Err(FrameError::BlockOverrun { index, count });
        }
        let data = reader.read_bytes(length)?;
        blocks.push(Block { block_type, data });
    }
    if reader.remaining() != 0 {
        return Err(FrameError::TrailingBytes {
            trailing: reader.remaining(),
            count,
        });
    }
    Ok(blocks)
}
