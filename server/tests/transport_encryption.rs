//! Session encryption at the transport: confidentiality after bind,
//! cleartext handshake types, and the crypto-failure teardown policy.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mxo_server::config::TransportConfig;
use mxo_server::transport::{SessionTransport, TransportError, TransportFault};
use mxo_shared::proto::{flags, msg};
use mxo_shared::Block;

const KEY: [u8; 16] = *b"0123456789ABCDEF";

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn bound_pair(now: Instant) -> (SessionTransport, SessionTransport) {
    let config = TransportConfig::default();
    let mut a = SessionTransport::new(addr(7000), config.clone(), now).unwrap();
    let mut b = SessionTransport::new(addr(7001), config, now).unwrap();
    a.bind_session_key(KEY);
    b.bind_session_key(KEY);
    (a, b)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn bound_sessions_never_leak_plaintext() {
    let now = Instant::now();
    let (mut a, mut b) = bound_pair(now);
    let secret = b"follow the white rabbit";
    let block = Block::build(msg::CHAT_MESSAGE, |body| {
        body.append(secret);
    });
    a.send(msg::CHAT_MESSAGE, vec![block], true, now).unwrap();

    let wires = a.take_outbound();
    assert_eq!(wires.len(), 1);
    assert!(wires[0][12] & flags::ENCRYPTED != 0);
    assert!(!contains(&wires[0], secret), "plaintext on the wire");

    let delivered = b.handle_datagram(&wires[0], now).unwrap();
    assert!(contains(&delivered[0].blocks[0].data, secret));
}

#[test]
fn handshake_types_stay_cleartext_after_bind() {
    let now = Instant::now();
    let (mut a, _) = bound_pair(now);
    let block = Block::build(msg::GAME_SESSION, |body| {
        body.write_u16(0);
    });
    a.send(msg::GAME_SESSION, vec![block], true, now).unwrap();
    let wires = a.take_outbound();
    assert_eq!(wires[0][12] & flags::ENCRYPTED, 0);
}

#[test]
fn tampering_drops_the_datagram_without_delivery() {
    let now = Instant::now();
    let (mut a, mut b) = bound_pair(now);
    let block = Block::build(msg::CHAT_MESSAGE, |body| {
        body.write_cstring("hello");
    });
    a.send(msg::CHAT_MESSAGE, vec![block], true, now).unwrap();
    let mut wire = a.take_outbound().remove(0);
    let last = wire.len() - 1;
    wire[last] ^= 0x40;

    let result = b.handle_datagram(&wire, now);
    assert!(matches!(result, Err(TransportError::Crypto(_))));
    // the drop did not mutate ordering state
    assert_eq!(b.expected_seq(), 0);
}

#[test]
fn repeated_crypto_failures_fault_the_session() {
    let now = Instant::now();
    let (mut a, mut b) = bound_pair(now);

    for i in 0..16u32 {
        let block = Block::build(msg::CHAT_MESSAGE, |body| {
            body.write_u32(i);
        });
        a.send(msg::CHAT_MESSAGE, vec![block], true, now).unwrap();
        let mut wire = a.take_outbound().remove(0);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        let _ = b.handle_datagram(&wire, now + Duration::from_secs(1));
    }
    assert_eq!(
        b.take_fault(),
        Some(TransportFault::CryptoFailures { failures: 16 })
    );
}

#[test]
fn failures_outside_the_window_are_forgotten() {
    let start = Instant::now();
    let (mut a, mut b) = bound_pair(start);

    // 15 failures, then a long pause, then 15 more: never 16 in-window
    for round in 0..2 {
        let at = start + Duration::from_secs(round * 120);
        for i in 0..15u32 {
            let block = Block::build(msg::CHAT_MESSAGE, |body| {
                body.write_u32(i);
            });
            a.send(msg::CHAT_MESSAGE, vec![block], true, at).unwrap();
            let mut wire = a.take_outbound().remove(0);
            let last = wire.len() - 1;
            wire[last] ^= 0xFF;
            let _ = b.handle_datagram(&wire, at);
        }
    }
    assert_eq!(b.take_fault(), None);
}
