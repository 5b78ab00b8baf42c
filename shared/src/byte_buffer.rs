use thiserror::Error;

/// Errors raised by [`ByteBuffer`] read and back-patch operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer bytes remain between the read cursor and the write cursor
    /// than the read requires
    #[error("truncated read: needed {needed} bytes, {remaining} remain")]
    Truncated { needed: usize, remaining: usize },

    /// A null-terminated string read ran off the end of the readable region
    #[error("unterminated string at read position {rpos}")]
    UnterminatedString { rpos: usize },

    /// A back-patch targeted bytes that were never written
    #[error("put out of bounds: {pos}+{len} exceeds buffer of {size} bytes")]
    PutOutOfBounds { pos: usize, len: usize, size: usize },
}

/// A growable byte container with independent read and write cursors.
///
/// All numeric primitives are written and read little-endian, matching the
/// wire convention used by every header and block in the protocol. Strings
/// are null-terminated unless the caller uses the length-prefixed variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    buf: Vec<u8>,
    rpos: usize,
    wpos: usize,
}

macro_rules! write_primitive {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, value: $ty) {
            self.append(&value.to_le_bytes());
        }
    };
}

macro_rules! read_primitive {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty, CodecError> {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            let bytes = self.read_exact(WIDTH)?;
            let mut raw = [0u8; WIDTH];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(raw))
        }
    };
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            rpos: 0,
            wpos: 0,
        }
    }

    /// Wraps existing bytes; the write cursor sits at the end so the whole
    /// slice is readable.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            buf: data.to_vec(),
            rpos: 0,
            wpos: data.len(),
        }
    }

    pub fn contents(&self) -> &[u8] {
        &self.buf[..self.wpos]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buf.truncate(self.wpos);
        self.buf
    }

    pub fn len(&self) -> usize {
        self.wpos
    }

    pub fn is_empty(&self) -> bool {
        self.wpos == 0
    }

    pub fn rpos(&self) -> usize {
        self.rpos
    }

    pub fn wpos(&self) -> usize {
        self.wpos
    }

    pub fn set_rpos(&mut self, pos: usize) {
        self.rpos = pos.min(self.wpos);
    }

    /// Number of unread bytes: `max(0, wpos - rpos)`.
    pub fn remaining(&self) -> usize {
        self.wpos.saturating_sub(self.rpos)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.rpos = 0;
        self.wpos = 0;
    }

    // Writing

    pub fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let end = self.wpos + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.wpos..end].copy_from_slice(data);
        self.wpos = end;
    }

    write_primitive!(write_u8, u8);
    write_primitive!(write_i8, i8);
    write_primitive!(write_u16, u16);
    write_primitive!(write_i16, i16);
    write_primitive!(write_u32, u32);
    write_primitive!(write_i32, i32);
    write_primitive!(write_u64, u64);
    write_primitive!(write_i64, i64);
    write_primitive!(write_f32, f32);
    write_primitive!(write_f64, f64);

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    /// Writes the string bytes followed by a single null terminator.
    pub fn write_cstring(&mut self, value: &str) {
        self.append(value.as_bytes());
        self.write_u8(0);
    }

    /// Writes a u16 length prefix followed by the raw string bytes.
    pub fn write_string_prefixed(&mut self, value: &str) {
        self.write_u16(value.len() as u16);
        self.append(value.as_bytes());
    }

    /// Reserves `width` zero bytes at the write cursor and returns their
    /// position, for later back-patching with one of the `put_*` methods.
    pub fn reserve(&mut self, width: usize) -> usize {
        let pos = self.wpos;
        self.append(&vec![0u8; width]);
        pos
    }

    /// Back-patches a previously reserved slot. Required for length
    /// prefixes that are only known once the rest of the body is written.
    pub fn put_u16(&mut self, pos: usize, value: u16) -> Result<(), CodecError> {
        self.put(pos, &value.to_le_bytes())
    }

    pub fn put_u32(&mut self, pos: usize, value: u32) -> Result<(), CodecError> {
        self.put(pos, &value.to_le_bytes())
    }

    fn put(&mut self, pos: usize, bytes: &[u8]) -> Result<(), CodecError> {
        let end = pos + bytes.len();
        if end > self.wpos {
            return Err(CodecError::PutOutOfBounds {
                pos,
                len: bytes.len(),
                size: self.wpos,
            });
        }
        self.buf[pos..end].copy_from_slice(bytes);
        Ok(())
    }

    // Reading

    fn read_exact(&mut self, width: usize) -> Result<&[u8], CodecError> {
        if self.remaining() < width {
            return Err(CodecError::Truncated {
                needed: width,
                remaining: self.remaining(),
            });
        }
        let start = self.rpos;
        self.rpos += width;
        Ok(&self.buf[start..self.rpos])
    }

    read_primitive!(read_u8, u8);
    read_primitive!(read_i8, i8);
    read_primitive!(read_u16, u16);
    read_primitive!(read_i16, i16);
    read_primitive!(read_u32, u32);
    read_primitive!(read_i32, i32);
    read_primitive!(read_u64, u64);
    read_primitive!(read_i64, i64);
    read_primitive!(read_f32, f32);
    read_primitive!(read_f64, f64);

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_bytes(&mut self, width: usize) -> Result<Vec<u8>, CodecError> {
        Ok(self.read_exact(width)?.to_vec())
    }

    /// Reads bytes up to (and consuming) the next null terminator.
    pub fn read_cstring(&mut self) -> Result<String, CodecError> {
        let start = self.rpos;
        while self.rpos < self.wpos {
            let byte = self.buf[self.rpos];
            self.rpos += 1;
            if byte == 0 {
                let raw = &self.buf[start..self.rpos - 1];
                return Ok(String::from_utf8_lossy(raw).into_owned());
            }
        }
        self.rpos = start;
        Err(CodecError::UnterminatedString { rpos: start })
    }

    pub fn read_string_prefixed(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        let raw = self.read_exact(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::{ByteBuffer, CodecError};

    #[test]
    fn primitive_round_trip() {
        let mut buffer = ByteBuffer::new();
        buffer.write_u8(0xA5);
        buffer.write_u16(0x1001);
        buffer.write_u32(0xDEAD_BEEF);
        buffer.write_u64(u64::MAX - 1);
        buffer.write_i32(-77);
        buffer.write_f64(1234.5678);

        assert_eq!(buffer.read_u8().unwrap(), 0xA5);
        assert_eq!(buffer.read_u16().unwrap(), 0x1001);
        assert_eq!(buffer.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(buffer.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(buffer.read_i32().unwrap(), -77);
        assert_eq!(buffer.read_f64().unwrap(), 1234.5678);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn little_endian_on_the_wire() {
        let mut buffer = ByteBuffer::new();
        buffer.write_u16(0x1001);
        buffer.write_u32(0x0A0B0C0D);
        assert_eq!(buffer.contents(), &[0x01, 0x10, 0x0D, 0x0C, 0x0B, 0x0A]);
    }

    #[test]
    fn cstring_round_trip() {
        let mut buffer = ByteBuffer::new();
        buffer.write_cstring("Neo");
        buffer.write_cstring("");
        buffer.write_u8(7);

        assert_eq!(buffer.read_cstring().unwrap(), "Neo");
        assert_eq!(buffer.read_cstring().unwrap(), "");
        assert_eq!(buffer.read_u8().unwrap(), 7);
    }

    #[test]
    fn prefixed_string_round_trip() {
        let mut buffer = ByteBuffer::new();
        buffer.write_string_prefixed("Morpheus");
        assert_eq!(buffer.read_string_prefixed().unwrap(), "Morpheus");
    }

    #[test]
    fn truncated_read_reports_remaining() {
        let mut buffer = ByteBuffer::new();
        buffer.write_u8(1);
        let err = buffer.read_u32().unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: 4,
                remaining: 1
            }
        );
        // the failed read must not advance the cursor
        assert_eq!(buffer.read_u8().unwrap(), 1);
    }

    #[test]
    fn unterminated_string_restores_cursor() {
        let mut buffer = ByteBuffer::new();
        buffer.append(b"no-term");
        assert!(matches!(
            buffer.read_cstring(),
            Err(CodecError::UnterminatedString { rpos: 0 })
        ));
        assert_eq!(buffer.remaining(), 7);
    }

    #[test]
    fn reserve_and_put_back_patches() {
        let mut buffer = ByteBuffer::new();
        let slot = buffer.reserve(2);
        buffer.write_cstring("body");
        let len = buffer.len() as u16;
        buffer.put_u16(slot, len).unwrap();

        assert_eq!(buffer.read_u16().unwrap(), len);
        assert_eq!(buffer.read_cstring().unwrap(), "body");
    }

    #[test]
    fn put_past_write_cursor_is_rejected() {
        let mut buffer = ByteBuffer::new();
        buffer.write_u8(0);
        assert!(matches!(
            buffer.put_u32(0, 1),
            Err(CodecError::PutOutOfBounds { .. })
        ));
    }

    #[test]
    fn remaining_never_goes_negative() {
        let mut buffer = ByteBuffer::from_bytes(&[1, 2]);
        buffer.read_u16().unwrap();
        assert_eq!(buffer.remaining(), 0);
    }
}
