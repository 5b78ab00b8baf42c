use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, trace};

use mxo_shared::proto::{flags, msg, PROTOCOL_MAGIC, PROTOCOL_VERSION};
use mxo_shared::{
    decode_blocks, decrypt_session, encode_blocks, encrypt_session, Block, ByteBuffer, Decoder,
    Encoder, FrameHeader, SequenceList, BLOCK_HEADER_LEN, HEADERS_LEN, SESSION_KEY_LEN,
    SESSION_NONCE_LEN,
};

use super::error::{TransportError, TransportFault};
use super::fragment::{split_unit, Reassembly};
use crate::config::TransportConfig;

/// Nonce plus AEAD tag added to every encrypted payload.
const ENCRYPTION_OVERHEAD: usize = SESSION_NONCE_LEN + 16;
const COMPRESSION_LEVEL: i32 = 3;

/// One queued outbound reliable datagram awaiting acknowledgment.
pub struct ReliableSlot {
    payload: Vec<u8>,
    pub first_send: Instant,
    pub last_send: Instant,
    pub send_count: u32,
}

/// An in-order message handed up to the player session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub message_type: u16,
    pub blocks: Vec<Block>,
}

struct BufferedFrame {
    message_type: u16,
    frame_flags: u8,
    blocks: Vec<Block>,
}

/// The per-peer reliable/ordered/encrypted/fragmented channel over the
/// shared UDP socket.
///
/// Two sequence spaces per session: `next_seq` is assigned to outbound
/// reliable datagrams at emit time, `expected_seq` is the next inbound
/// reliable sequence that will be delivered. The ack field is cumulative:
/// it always carries `expected_seq - 1`, and receipt of ack `a` clears
/// every outstanding slot `<= a` under the wrapping comparator.
pub struct SessionTransport {
    peer: SocketAddr,
    config: TransportConfig,

    next_seq: u16,
    expected_seq: u16,
    slots: SequenceList<ReliableSlot>,
    ahead: SequenceList<BufferedFrame>,
    history: VecDeque<u16>,
    reassembly: Option<Reassembly>,

    encoder: Encoder,
    decoder: Decoder,
    session_key: Option<[u8; SESSION_KEY_LEN]>,
    crypto_failures: VecDeque<Instant>,

    pending_ack_since: Option<Instant>,
    last_recv: Instant,
    last_send: Instant,

    fault: Option<TransportFault>,
    outbound: Vec<Vec<u8>>,
}

impl SessionTransport {
    pub fn new(
        peer: SocketAddr,
        config: TransportConfig,
        now: Instant,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            peer,
            config,
            next_seq: 0,
            expected_seq: 0,
            slots: SequenceList::new(),
            ahead: SequenceList::new(),
            history: VecDeque::new(),
            reassembly: None,
            encoder: Encoder::new(COMPRESSION_LEVEL)?,
            decoder: Decoder::new()?,
            session_key: None,
            crypto_failures: VecDeque::new(),
            pending_ack_since: None,
            last_recv: now,
            last_send: now,
            fault: None,
            outbound: Vec::new(),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn expected_seq(&self) -> u16 {
        self.expected_seq
    }

    pub fn outstanding(&self) -> usize {
        self.slots.len()
    }

    pub fn is_bound(&self) -> bool {
        self.session_key.is_some()
    }

    /// Binds the session key; from here on every non-handshake datagram
    /// with a payload goes out encrypted.
    pub fn bind_session_key(&mut self, key: [u8; SESSION_KEY_LEN]) {
        self.session_key = Some(key);
    }

    /// Drains datagrams queued for the socket.
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }

    /// Collects the session-fatal fault, if one was recorded.
    pub fn take_fault(&mut self) -> Option<TransportFault> {
        self.fault.take()
    }

    // Outgoing

    /// Queues a message for the peer. Payloads past the datagram budget
    /// are split into fragments on contiguous reliable sequences; a full
    /// outbound window fails with `WindowFull` and mutates nothing, so
    /// the caller can retry on a later tick.
    pub fn send(
        &mut self,
        message_type: u16,
        blocks: Vec<Block>,
        reliable: bool,
        now: Instant,
    ) -> Result<(), TransportError> {
        let raw = encode_blocks(&blocks);
        let encrypt = self.should_encrypt(message_type, &raw);

        // try per-datagram compression; the flag is only set when it wins
        let mut payload = raw.clone();
        let mut frame_flags = if reliable { flags::RELIABLE } else { 0 };
        let compressed = self.encoder.encode(&raw)?;
        if compressed.len() < raw.len() {
            payload = compressed.to_vec();
            frame_flags |= flags::COMPRESSED;
        }

        let overhead = if encrypt { ENCRYPTION_OVERHEAD } else { 0 };
        if HEADERS_LEN + payload.len() + overhead <= self.config.mtu {
            if reliable && self.slots.len() >= self.config.window {
                return Err(TransportError::WindowFull {
                    outstanding: self.slots.len(),
                    window: self.config.window,
                });
            }
            let sequence = if reliable { self.take_seq() } else { 0 };
            let wire = self.build_datagram(
                message_type,
                sequence,
                frame_flags,
                blocks.len() as u8,
                &payload,
                encrypt,
            )?;
            if reliable {
                self.store_slot(sequence, wire.clone(), now);
            }
            self.emit(wire, now);
            return Ok(());
        }

        // Fragmentation: the unit is the block count plus the raw block
        // bytes; every fragment rides the reliable channel.
        let mut unit = Vec::with_capacity(1 + raw.len());
        unit.push(blocks.len() as u8);
        unit.extend_from_slice(&raw);

        let max_chunk = self.config.mtu - HEADERS_LEN - BLOCK_HEADER_LEN - overhead;
        let chunks = split_unit(&unit, max_chunk);
        if self.slots.len() + chunks.len() > self.config.window {
            return Err(TransportError::WindowFull {
                outstanding: self.slots.len(),
                window: self.config.window,
            });
        }
        trace!(
            "fragmenting {} byte unit to {} into {} datagrams",
            unit.len(),
            self.peer,
            chunks.len()
        );
        for chunk in chunks {
            let sequence = self.take_seq();
            let fragment_payload = encode_blocks(&[Block::new(message_type, chunk)]);
            let wire = self.build_datagram(
                message_type,
                sequence,
                flags::RELIABLE | flags::FRAGMENT,
                1,
                &fragment_payload,
                encrypt,
            )?;
            self.store_slot(sequence, wire.clone(), now);
            self.emit(wire, now);
        }
        Ok(())
    }

    fn should_encrypt(&self, message_type: u16, payload: &[u8]) -> bool {
        self.session_key.is_some() && !msg::is_handshake(message_type) && !payload.is_empty()
    }

    fn take_seq(&mut self) -> u16 {
        let sequence = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        sequence
    }

    fn build_datagram(
        &self,
        message_type: u16,
        sequence: u16,
        mut frame_flags: u8,
        block_count: u8,
        payload: &[u8],
        encrypt: bool,
    ) -> Result<Vec<u8>, TransportError> {
        let body: Vec<u8>;
        if encrypt {
            let key = self.session_key.ok_or(TransportError::NotBound)?;
            body = encrypt_session(&key, payload)?;
            frame_flags |= flags::ENCRYPTED;
        } else {
            body = payload.to_vec();
        }

        let total = (HEADERS_LEN + body.len()) as u32;
        let mut out = ByteBuffer::with_capacity(total as usize);
        out.write_u8(PROTOCOL_MAGIC);
        out.write_u8(PROTOCOL_VERSION);
        out.write_u16(message_type);
        out.write_u32(total);
        out.write_u16(sequence);
        out.write_u16(self.expected_seq.wrapping_sub(1));
        out.write_u8(frame_flags);
        out.write_u8(block_count);
        out.append(&body);
        Ok(out.into_bytes())
    }

    fn store_slot(&mut self, sequence: u16, payload: Vec<u8>, now: Instant) {
        // next_seq strictly increases, so the sequence cannot collide with
        // an outstanding slot inside a 2^15 window
        let _ = self.slots.insert(
            sequence,
            ReliableSlot {
                payload,
                first_send: now,
                last_send: now,
                send_count: 1,
            },
        );
    }

    fn emit(&mut self, wire: Vec<u8>, now: Instant) {
        // every data datagram piggybacks the cumulative ack
        self.pending_ack_since = None;
        self.last_send = now;
        self.outbound.push(wire);
    }

    // Incoming

    /// Processes one raw datagram from the peer, returning any messages
    /// that became deliverable in order.
    pub fn handle_datagram(
        &mut self,
        data: &[u8],
        now: Instant,
    ) -> Result<Vec<DeliveredMessage>, TransportError> {
        let (header, payload) = FrameHeader::peek(data)?;
        self.last_recv = now;
        self.process_ack(header.ack);

        let mut plain: Vec<u8>;
        if header.is_encrypted() {
            let Some(key) = self.session_key else {
                return Err(TransportError::NotBound);
            };
            match decrypt_session(&key, payload) {
                Ok(decrypted) => plain = decrypted,
                Err(e) => {
                    self.note_crypto_failure(now);
                    return Err(e.into());
                }
            }
        } else {
            plain = payload.to_vec();
        }
        if header.flags & flags::COMPRESSED != 0 {
            plain = self.decoder.decode(&plain)?.to_vec();
        }
        let blocks = decode_blocks(&plain, header.block_count)?;

        // transport-internal traffic never reaches the player layer
        match header.message_type {
            msg::GAME_ACK | msg::GAME_PONG => return Ok(Vec::new()),
            msg::GAME_PING => {
                self.send(msg::GAME_PONG, Vec::new(), false, now)?;
                return Ok(Vec::new());
            }
            _ => {}
        }

        if !header.is_reliable() {
            return Ok(vec![DeliveredMessage {
                message_type: header.message_type,
                blocks,
            }]);
        }
        self.handle_reliable(header, blocks, now)
    }

    fn process_ack(&mut self, ack: u16) {
        let cleared = self.slots.remove_up_to(ack);
        if !cleared.is_empty() {
            trace!(
                "{}: ack {} cleared {} slots",
                self.peer,
                ack,
                cleared.len()
            );
        }
    }

    fn handle_reliable(
        &mut self,
        header: FrameHeader,
        blocks: Vec<Block>,
        now: Instant,
    ) -> Result<Vec<DeliveredMessage>, TransportError> {
        let sequence = header.sequence;
        let window = self.config.window as u16;
        let mut delivered = Vec::new();

        if sequence == self.expected_seq {
            self.advance_expected(sequence);
            self.schedule_ack(now);
            if let Some(message) =
                self.accept(header.message_type, header.flags, blocks, now)?
            {
                delivered.push(message);
            }
            // drain anything buffered while waiting on this sequence
            loop {
                match self.ahead.front() {
                    Some((buffered_seq, _)) if *buffered_seq == self.expected_seq => {}
                    _ => break,
                }
                let Some((buffered_seq, buffered)) = self.ahead.pop_front() else {
                    break;
                };
                self.advance_expected(buffered_seq);
                if let Some(message) = self.accept(
                    buffered.message_type,
                    buffered.frame_flags,
                    buffered.blocks,
                    now,
                )? {
                    delivered.push(message);
                }
            }
            return Ok(delivered);
        }

        let dist_ahead = sequence.wrapping_sub(self.expected_seq);
        if (1..=window).contains(&dist_ahead) {
            // hold for in-order delivery; a duplicate of a buffered
            // sequence is acked again without re-buffering
            let _ = self.ahead.insert(
                sequence,
                BufferedFrame {
                    message_type: header.message_type,
                    frame_flags: header.flags,
                    blocks,
                },
            );
            self.schedule_ack(now);
            return Ok(delivered);
        }

        let dist_behind = self.expected_seq.wrapping_sub(sequence);
        if (1..=window).contains(&dist_behind) || self.history.contains(&sequence) {
            // retransmit of something already delivered: payload dropped,
            // ack still owed so the peer can clear its slot
            trace!("{}: duplicate sequence {}", self.peer, sequence);
            self.schedule_ack(now);
        } else {
            debug!(
                "{}: out-of-window sequence {} (expected {}), dropped",
                self.peer, sequence, self.expected_seq
            );
        }
        Ok(delivered)
    }

    fn advance_expected(&mut self, delivered: u16) {
        self.history.push_back(delivered);
        while self.history.len() > self.config.window * 2 {
            self.history.pop_front();
        }
        self.expected_seq = self.expected_seq.wrapping_add(1);
    }

    fn accept(
        &mut self,
        message_type: u16,
        frame_flags: u8,
        blocks: Vec<Block>,
        now: Instant,
    ) -> Result<Option<DeliveredMessage>, TransportError> {
        if frame_flags & flags::FRAGMENT == 0 {
            return Ok(Some(DeliveredMessage {
                message_type,
                blocks,
            }));
        }

        let chunk: &[u8] = blocks.first().map(|b| b.data.as_slice()).unwrap_or(&[]);
        match self.reassembly.as_mut() {
            None => {
                self.reassembly = Some(Reassembly::begin(message_type, chunk, now)?);
            }
            Some(reassembly) => {
                if let Err(e) = reassembly.feed(chunk) {
                    self.reassembly = None;
                    return Err(e.into());
                }
            }
        }

        let complete = self.reassembly.as_ref().map_or(false, |r| r.is_complete());
        if complete {
            if let Some(reassembly) = self.reassembly.take() {
                let message_type = reassembly.message_type();
                let unit = reassembly.into_unit();
                let mut reader = ByteBuffer::from_bytes(&unit);
                let block_count = reader.read_u8()?;
                let blocks = decode_blocks(&unit[1..], block_count)?;
                return Ok(Some(DeliveredMessage {
                    message_type,
                    blocks,
                }));
            }
        }
        Ok(None)
    }

    fn schedule_ack(&mut self, now: Instant) {
        if self.pending_ack_since.is_none() {
            self.pending_ack_since = Some(now);
        }
    }

    fn note_crypto_failure(&mut self, now: Instant) {
        let window = Duration::from_millis(self.config.crypto_failure_window_ms);
        self.crypto_failures.push_back(now);
        while self
            .crypto_failures
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            self.crypto_failures.pop_front();
        }
        let failures = self.crypto_failures.len() as u32;
        if failures >= self.config.crypto_failure_limit {
            self.fault
                .get_or_insert(TransportFault::CryptoFailures { failures });
        }
    }

    // Timers

    /// Runs the per-tick timer sweep: retransmits, coalesced acks,
    /// keepalives, the connection timeout, and stale reassemblies.
    pub fn service(&mut self, now: Instant) {
        let resend = Duration::from_millis(self.config.resend_interval_ms);
        let mut exceeded = None;
        let mut resends = Vec::new();
        for entry in self.slots.iter_mut() {
            let (sequence, slot) = entry;
            if now.duration_since(slot.last_send) < resend {
                continue;
            }
            if slot.send_count >= self.config.max_send_count {
                exceeded = Some(TransportFault::RetransmitLimit {
                    sequence: *sequence,
                    send_count: slot.send_count,
                });
                break;
            }
            slot.last_send = now;
            slot.send_count += 1;
            resends.push(slot.payload.clone());
        }
        if let Some(fault) = exceeded {
            self.fault.get_or_insert(fault);
        }
        if !resends.is_empty() {
            self.last_send = now;
            self.outbound.extend(resends);
        }

        if let Some(since) = self.pending_ack_since {
            if now.duration_since(since) >= Duration::from_millis(self.config.ack_coalesce_ms) {
                if let Ok(wire) = self.build_datagram(msg::GAME_ACK, 0, 0, 0, &[], false) {
                    self.outbound.push(wire);
                }
                self.pending_ack_since = None;
                self.last_send = now;
            }
        }

        if now.duration_since(self.last_send)
            >= Duration::from_millis(self.config.ping_interval_ms)
        {
            if let Ok(wire) = self.build_datagram(msg::GAME_PING, 0, 0, 0, &[], false) {
                self.outbound.push(wire);
            }
            self.last_send = now;
        }

        if now.duration_since(self.last_recv)
            >= Duration::from_millis(self.config.connection_timeout_ms)
        {
            self.fault.get_or_insert(TransportFault::Timeout);
        }

        let reassembly_timeout = Duration::from_millis(self.config.reassembly_timeout_ms);
        if self
            .reassembly
            .as_ref()
            .is_some_and(|r| r.is_stale(now, reassembly_timeout))
        {
            debug!("{}: discarding stale partial reassembly", self.peer);
            self.reassembly = None;
        }
    }
}
