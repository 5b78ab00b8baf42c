//! The S5 jackout flow: grace period, despawn broadcast, teardown, and
//! index cleanup.

mod common;

use std::time::Duration;

use common::TestWorld;

use mxo_server::player::SessionState;
use mxo_shared::proto::{cmd, msg};

#[test]
fn s5_jackout_after_grace_period() {
    let mut world = TestWorld::new();
    world.seed_character(42, "Neo");
    world.seed_character(43, "Trinity");
    let mut neo = world.connect("127.0.0.1:5300", 42);
    let mut trinity = world.connect("127.0.0.1:5301", 43);
    world.enter_world(&mut neo);
    world.enter_world(&mut trinity);
    world.pump_pair(&mut neo, &mut trinity);
    neo.take_inbox();
    trinity.take_inbox();

    let id = world.world.index().session_by_character(42).unwrap();

    // T: the jackout request schedules the event and is acknowledged
    neo.send_command(&[cmd::JACKOUT_REQUEST], world.now);
    world.pump_pair(&mut neo, &mut trinity);
    assert!(neo
        .take_inbox()
        .iter()
        .any(|m| m.message_type == msg::JACKOUT_RESPONSE));

    // during the grace period the player object stays in the world
    assert!(world
        .world
        .graph()
        .lock()
        .object_id_by_handle("Neo")
        .is_some());
    assert_eq!(world.world.session_state(id), Some(SessionState::InWorld));

    // walk to T+30s in keepalive-sized steps; the event fires once the
    // grace period elapses and the district sees the destroy
    for _ in 0..6 {
        world.advance(Duration::from_secs(5));
        world.pump_pair(&mut neo, &mut trinity);
    }
    assert!(world
        .world
        .graph()
        .lock()
        .object_id_by_handle("Neo")
        .is_none());
    let observed: Vec<u16> = trinity
        .take_inbox()
        .iter()
        .map(|m| m.message_type)
        .collect();
    assert!(observed.contains(&msg::OBJECT_DESTROY));

    // once the client acks what is pending, the session closes and
    // leaves all three indices well inside the 10 s bound
    for _ in 0..10 {
        world.pump_pair(&mut neo, &mut trinity);
        if world.world.index().session_by_character(42).is_none() {
            break;
        }
    }
    assert!(world.world.index().session_by_character(42).is_none());
    assert!(world.world.index().session_by_handle("Neo").is_none());
    assert!(world
        .world
        .index()
        .session_by_addr(&"127.0.0.1:5300".parse().unwrap())
        .is_none());

    // the other session is untouched
    assert!(world.world.index().session_by_character(43).is_some());
}

#[test]
fn jackout_finished_skips_the_grace_period() {
    let mut world = TestWorld::new();
    world.seed_character(42, "Neo");
    let mut client = world.connect("127.0.0.1:5302", 42);
    world.enter_world(&mut client);

    let id = world.world.index().session_by_character(42).unwrap();
    client.send_command(&[cmd::JACKOUT_FINISHED], world.now);
    world.pump(&mut client);

    assert!(world
        .world
        .graph()
        .lock()
        .object_id_by_handle("Neo")
        .is_none());
    let state = world.world.session_state(id);
    assert!(
        state == Some(SessionState::Disconnecting) || state == Some(SessionState::Closed),
        "immediate teardown, got {state:?}"
    );
}

#[test]
fn persisted_position_survives_the_session() {
    let mut world = TestWorld::new();
    world.seed_character(42, "Neo");
    let mut client = world.connect("127.0.0.1:5303", 42);
    world.enter_world(&mut client);

    // move, then jack out immediately
    let mut jump = vec![cmd::JUMP];
    let mut position = mxo_shared::ByteBuffer::new();
    mxo_shared::Location::new(77.0, 88.0, 9.0, 1.0).write(&mut position);
    jump.extend_from_slice(position.contents());
    client.send_command(&jump, world.now);
    world.pump(&mut client);
    client.send_command(&[cmd::JACKOUT_FINISHED], world.now);
    for _ in 0..6 {
        world.pump(&mut client);
    }
    assert!(world.world.index().session_by_character(42).is_none());

    // the final persistence write drains through the store worker
    let TestWorld { writer, store, .. } = world;
    writer.shutdown();
    let row = store.character(42).expect("character persisted");
    assert_eq!(row.x, 77.0);
    assert_eq!(row.y, 88.0);
}
