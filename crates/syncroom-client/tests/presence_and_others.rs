//! Presence buffering, throttled flushes, peer bookkeeping, and the
//! initial-presence gate.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};

use common::{obj, Harness, TimerKind};
use syncroom_client::{CustomEvent, OthersEvent, PresenceOptions};

#[test]
fn rapid_updates_coalesce_into_one_frame_with_last_value_per_key() {
    let mut harness = Harness::new(Harness::default_config());
    harness.connect_as(1);
    let frames_before = harness.sent_json().len();

    harness
        .room
        .update_presence(obj(json!({"x": 1})), PresenceOptions::default());
    harness
        .room
        .update_presence(obj(json!({"x": 2, "y": 1})), PresenceOptions::default());
    harness
        .room
        .update_presence(obj(json!({"x": 3})), PresenceOptions::default());

    // Inside the throttle window nothing further went out.
    assert_eq!(harness.sent_json().len(), frames_before);

    harness.advance(150);
    harness.fire_timer(TimerKind::Flush);

    let frames = harness.sent_json();
    assert_eq!(frames.len(), frames_before + 1);
    assert_eq!(
        frames.last().unwrap(),
        &json!({"type": 100, "data": {"x": 3, "y": 1}})
    );
}

#[test]
fn presence_updates_merge_and_null_removes() {
    let mut harness = Harness::new(
        Harness::default_config().with_initial_presence(obj(json!({"status": "idle"}))),
    );
    harness.connect_as(1);

    harness
        .room
        .update_presence(obj(json!({"cursor": {"x": 4}})), PresenceOptions::default());
    assert_eq!(
        Value::Object(harness.room.presence().clone()),
        json!({"status": "idle", "cursor": {"x": 4}})
    );

    harness
        .room
        .update_presence(obj(json!({"cursor": null})), PresenceOptions::default());
    assert_eq!(
        Value::Object(harness.room.presence().clone()),
        json!({"status": "idle"})
    );
}

#[test]
fn user_joined_gets_a_targeted_full_presence_introduction() {
    let mut harness = Harness::new(
        Harness::default_config().with_initial_presence(obj(json!({"status": "here"}))),
    );
    harness.connect_as(1);
    harness.advance(200);

    harness.deliver(json!({"type": 101, "actor": 7, "id": "u7", "info": {"name": "g"}}));

    assert_eq!(harness.room.others().count(), 1);
    let frames = harness.sent_json();
    assert_eq!(
        frames.last().unwrap(),
        &json!({"type": 100, "data": {"status": "here"}, "targetActor": 7})
    );
}

#[test]
fn initial_presence_gate_drops_untargeted_diffs() {
    let mut harness = Harness::new(Harness::default_config());
    harness.connect_as(1);

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    harness
        .room
        .subscribe_others(move |_, event| sink.borrow_mut().push(event.clone()));

    harness.deliver(json!({"type": 101, "actor": 7}));
    // An untargeted diff before the peer's full presence: dropped.
    harness.deliver(json!({"type": 100, "actor": 7, "data": {"cursor": "A"}}));
    assert_eq!(
        harness.room.others().get(7).unwrap().presence,
        None
    );
    assert_eq!(
        *events.borrow(),
        vec![OthersEvent::Enter { connection_id: 7 }]
    );

    // The targeted full presence lands.
    harness.deliver(json!({"type": 100, "actor": 7, "targetActor": 1, "data": {"cursor": "B"}}));
    assert_eq!(
        harness.room.others().get(7).unwrap().presence,
        Some(obj(json!({"cursor": "B"})))
    );

    // From here on, untargeted diffs merge.
    harness.deliver(json!({"type": 100, "actor": 7, "data": {"flag": true}}));
    assert_eq!(
        harness.room.others().get(7).unwrap().presence,
        Some(obj(json!({"cursor": "B", "flag": true})))
    );
}

#[test]
fn unknown_actor_presence_creates_the_record() {
    let mut harness = Harness::new(Harness::default_config());
    harness.connect_as(1);
    harness.deliver(json!({"type": 100, "actor": 9, "data": {"cursor": "Z"}}));
    assert_eq!(
        harness.room.others().get(9).unwrap().presence,
        Some(obj(json!({"cursor": "Z"})))
    );
}

#[test]
fn room_state_replaces_users_wholesale() {
    let mut harness = Harness::new(Harness::default_config());
    harness.connect_as(1);

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    harness
        .room
        .subscribe_others(move |view, event| sink.borrow_mut().push((view.count(), event.clone())));

    harness.deliver(json!({"type": 104, "users": {
        "3": {"id": "u3"},
        "4": {"info": {"name": "d"}},
    }}));

    assert_eq!(harness.room.others().count(), 2);
    assert_eq!(harness.room.others().get(3).unwrap().id.as_deref(), Some("u3"));
    assert_eq!(*events.borrow(), vec![(2, OthersEvent::Reset)]);

    harness.deliver(json!({"type": 102, "actor": 3}));
    assert_eq!(harness.room.others().count(), 1);
    assert_eq!(
        events.borrow().last().unwrap(),
        &(1, OthersEvent::Leave { connection_id: 3 })
    );
}

#[test]
fn broadcast_events_round_trip() {
    let mut harness = Harness::new(Harness::default_config());
    harness.connect_as(1);
    harness.advance(200);

    harness.room.broadcast_event(json!({"emoji": "wave"}));
    assert_eq!(
        harness.sent_json().last().unwrap(),
        &json!({"type": 103, "event": {"emoji": "wave"}})
    );

    let events: Rc<RefCell<Vec<CustomEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    harness
        .room
        .subscribe_event(move |event| sink.borrow_mut().push(event.clone()));

    harness.deliver(json!({"type": 103, "actor": 6, "event": [1, 2, 3]}));
    assert_eq!(
        *events.borrow(),
        vec![CustomEvent {
            actor: 6,
            event: json!([1, 2, 3])
        }]
    );
}

#[test]
fn malformed_frames_are_dropped_without_disturbing_state() {
    let mut harness = Harness::new(Harness::default_config());
    harness.connect_as(1);
    harness.deliver(json!({"type": 101, "actor": 2}));

    harness.room.on_socket_message("{{{not json");
    harness.room.on_socket_message(r#"{"type": 31337}"#);
    harness.room.on_socket_message(r#"{"actor": 5}"#);

    assert_eq!(harness.room.others().count(), 1);
    assert!(harness.room.connection_state().is_open());
}

#[test]
fn unsubscribed_listeners_stop_firing() {
    let mut harness = Harness::new(Harness::default_config());
    harness.connect_as(1);

    let calls = Rc::new(RefCell::new(0u32));
    let sink = Rc::clone(&calls);
    let handle = harness.room.subscribe_others(move |_, _| *sink.borrow_mut() += 1);

    harness.deliver(json!({"type": 101, "actor": 2}));
    assert_eq!(*calls.borrow(), 1);

    assert!(harness.room.unsubscribe(handle));
    assert!(!harness.room.unsubscribe(handle));
    harness.deliver(json!({"type": 101, "actor": 3}));
    assert_eq!(*calls.borrow(), 1);
}
