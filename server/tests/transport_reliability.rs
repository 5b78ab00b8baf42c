//! Reliable delivery behavior of the session transport: ordering, loss
//! recovery, duplicates, the outbound window, and the sequence wrap.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mxo_server::config::TransportConfig;
use mxo_server::transport::{SessionTransport, TransportError, TransportFault};
use mxo_shared::proto::{flags, msg};
use mxo_shared::{Block, FrameHeader};

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn pair(now: Instant) -> (SessionTransport, SessionTransport) {
    let config = TransportConfig::default();
    let a = SessionTransport::new(addr(5000), config.clone(), now).unwrap();
    let b = SessionTransport::new(addr(5001), config, now).unwrap();
    (a, b)
}

fn chat(text: &str) -> Vec<Block> {
    vec![Block::build(msg::CHAT_MESSAGE, |body| {
        body.write_cstring(text);
    })]
}

fn delivered_texts(
    transport: &mut SessionTransport,
    wires: &[Vec<u8>],
    now: Instant,
) -> Vec<String> {
    let mut texts = Vec::new();
    for wire in wires {
        for message in transport.handle_datagram(wire, now).unwrap() {
            let mut reader = message.blocks[0].reader();
            texts.push(reader.read_cstring().unwrap());
        }
    }
    texts
}

#[test]
fn delivers_in_emission_order() {
    let now = Instant::now();
    let (mut a, mut b) = pair(now);
    for text in ["one", "two", "three"] {
        a.send(msg::CHAT_MESSAGE, chat(text), true, now).unwrap();
    }
    let wires = a.take_outbound();
    assert_eq!(delivered_texts(&mut b, &wires, now), vec!["one", "two", "three"]);
    assert_eq!(b.expected_seq(), 3);
}

#[test]
fn loss_is_recovered_by_retransmit() {
    // S2: seq 0 is lost, seq 1 is buffered, the retransmit fills the gap
    let start = Instant::now();
    let (mut a, mut b) = pair(start);
    a.send(msg::CHAT_MESSAGE, chat("zero"), true, start).unwrap();
    a.send(msg::CHAT_MESSAGE, chat("one"), true, start).unwrap();
    let wires = a.take_outbound();
    assert_eq!(wires.len(), 2);

    // only seq 1 arrives: buffered, not delivered, but acked
    let delivered = b.handle_datagram(&wires[1], start).unwrap();
    assert!(delivered.is_empty());
    assert_eq!(b.expected_seq(), 0);

    let ack_due = start + Duration::from_millis(25);
    b.service(ack_due);
    let acks = b.take_outbound();
    assert!(!acks.is_empty());
    for ack in &acks {
        a.handle_datagram(ack, ack_due).unwrap();
    }
    // the cumulative ack covers nothing yet; both slots remain
    assert_eq!(a.outstanding(), 2);

    // past the resend interval, the lost datagram is re-emitted
    let resend_due = start + Duration::from_millis(510);
    a.service(resend_due);
    let retransmits = a.take_outbound();
    assert!(!retransmits.is_empty());

    let mut texts = delivered_texts(&mut b, &retransmits, resend_due);
    texts.extend(delivered_texts(&mut b, &wires[..1], resend_due));
    assert_eq!(texts, vec!["zero", "one"]);
    assert_eq!(b.expected_seq(), 2);
}

#[test]
fn duplicate_is_delivered_once_and_still_acked() {
    // S3
    let now = Instant::now();
    let (mut a, mut b) = pair(now);
    a.send(msg::CHAT_MESSAGE, chat("only"), true, now).unwrap();
    let wires = a.take_outbound();

    assert_eq!(delivered_texts(&mut b, &wires, now), vec!["only"]);
    // the duplicate delivers nothing but still owes an ack
    assert!(b.handle_datagram(&wires[0], now).unwrap().is_empty());

    let ack_due = now + Duration::from_millis(25);
    b.service(ack_due);
    let acks = b.take_outbound();
    assert!(!acks.is_empty());
    for ack in &acks {
        a.handle_datagram(ack, ack_due).unwrap();
    }
    assert_eq!(a.outstanding(), 0);
}

#[test]
fn acked_payload_is_never_resent() {
    // T1
    let start = Instant::now();
    let (mut a, mut b) = pair(start);
    a.send(msg::CHAT_MESSAGE, chat("payload"), true, start).unwrap();
    for wire in a.take_outbound() {
        b.handle_datagram(&wire, start).unwrap();
    }
    let ack_due = start + Duration::from_millis(25);
    b.service(ack_due);
    for ack in b.take_outbound() {
        a.handle_datagram(&ack, ack_due).unwrap();
    }
    assert_eq!(a.outstanding(), 0);

    // long after the resend interval, nothing reliable goes out again
    a.service(start + Duration::from_secs(2));
    for wire in a.take_outbound() {
        let (header, _) = FrameHeader::peek(&wire).unwrap();
        assert_eq!(header.flags & flags::RELIABLE, 0, "reliable re-emission");
    }
}

#[test]
fn window_full_is_reported_and_mutates_nothing() {
    let now = Instant::now();
    let mut config = TransportConfig::default();
    config.window = 4;
    let mut a = SessionTransport::new(addr(5002), config, now).unwrap();

    for i in 0..4 {
        a.send(msg::CHAT_MESSAGE, chat(&format!("{i}")), true, now)
            .unwrap();
    }
    let result = a.send(msg::CHAT_MESSAGE, chat("overflow"), true, now);
    assert!(matches!(
        result,
        Err(TransportError::WindowFull {
            outstanding: 4,
            window: 4
        })
    ));
    assert_eq!(a.outstanding(), 4);
    // the failed send consumed no sequence: emitted datagrams are 0..=3
    let wires = a.take_outbound();
    let (last_header, _) = FrameHeader::peek(wires.last().unwrap()).unwrap();
    assert_eq!(last_header.sequence, 3);
}

#[test]
fn ordering_survives_the_sequence_wrap() {
    let mut now = Instant::now();
    let (mut a, mut b) = pair(now);

    // walk both sequence spaces up to just before the wrap
    for _ in 0..65535u32 {
        a.send(msg::CHAT_MESSAGE, chat("x"), true, now).unwrap();
        for wire in a.take_outbound() {
            b.handle_datagram(&wire, now).unwrap();
        }
        now += Duration::from_millis(21);
        b.service(now);
        for ack in b.take_outbound() {
            a.handle_datagram(&ack, now).unwrap();
        }
    }
    assert_eq!(b.expected_seq(), 65535);

    // seq 65535 and seq 0 arrive out of order
    a.send(msg::CHAT_MESSAGE, chat("last"), true, now).unwrap();
    a.send(msg::CHAT_MESSAGE, chat("wrapped"), true, now).unwrap();
    let wires = a.take_outbound();
    assert!(b.handle_datagram(&wires[1], now).unwrap().is_empty());
    let texts = delivered_texts(&mut b, &wires[..1], now);
    assert_eq!(texts, vec!["last", "wrapped"]);
    assert_eq!(b.expected_seq(), 1);
}

#[test]
fn window_plus_one_ahead_is_dropped_without_ack() {
    let now = Instant::now();
    let mut wide = TransportConfig::default();
    wide.window = 128;
    let mut a = SessionTransport::new(addr(5003), wide, now).unwrap();
    let mut b = SessionTransport::new(addr(5004), TransportConfig::default(), now).unwrap();

    for i in 0..=65u32 {
        a.send(msg::CHAT_MESSAGE, chat(&format!("{i}")), true, now)
            .unwrap();
    }
    let wires = a.take_outbound();

    // seq 65 sits window+1 ahead of expected 0: dropped, not acked
    assert!(b.handle_datagram(&wires[65], now).unwrap().is_empty());
    b.service(now + Duration::from_millis(25));
    assert!(b.take_outbound().is_empty());

    // seq 64 is exactly window ahead: buffered and acked
    assert!(b.handle_datagram(&wires[64], now).unwrap().is_empty());
    b.service(now + Duration::from_millis(50));
    assert!(!b.take_outbound().is_empty());
}

#[test]
fn retransmit_limit_tears_the_session_down() {
    let start = Instant::now();
    let (mut a, _b) = pair(start);
    a.send(msg::CHAT_MESSAGE, chat("void"), true, start).unwrap();
    let _ = a.take_outbound();

    let mut now = start;
    for _ in 0..12 {
        now += Duration::from_millis(500);
        a.service(now);
        let _ = a.take_outbound();
        if a.take_fault().is_some() {
            return; // reached the bound
        }
    }
    panic!("retransmit limit never tripped");
}

#[test]
fn silence_times_the_connection_out() {
    let start = Instant::now();
    let (mut a, _b) = pair(start);
    a.service(start + Duration::from_secs(31));
    assert_eq!(a.take_fault(), Some(TransportFault::Timeout));
}
