// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use s7_gateway::tags::{EventKind, Tag, TagEvent, TagValue};
use tokio::time::sleep;

use super::{bool_decl, decl, default_of};
use s7_gateway::tags::DataType;

type Captured = Arc<Mutex<Vec<(EventKind, Option<TagValue>, TagValue)>>>;

fn capture_into(events: &Captured) -> s7_gateway::tags::monitor::EventHandler {
    let events = Arc::clone(events);
    Arc::new(move |event: &TagEvent| {
        events
            .lock()
            .expect("capture lock")
            .push((event.kind, event.old_value.clone(), event.new_value.clone()));
    })
}

async fn wait_for_events(events: &Captured, expected: usize) {
    for _ in 0..100 {
        if events.lock().expect("capture lock").len() >= expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for {expected} events, got {}",
        events.lock().expect("capture lock").len()
    );
}

/// The edge-exactness law: for assignments false, true, true, false the
/// handlers observe exactly CHANGE+RISING+BOTH then CHANGE+FALLING+BOTH,
/// with nothing for the duplicate.
#[tokio::test]
async fn edge_exactness_for_bool_sequence() {
    let tag = Tag::new(default_of(bool_decl("estop", 1, 0, 0), TagValue::Bool(false)));
    let events: Captured = Arc::default();
    for kind in [EventKind::Rising, EventKind::Falling, EventKind::Both, EventKind::Change] {
        tag.monitor().register_handler(kind, capture_into(&events));
    }
    tag.monitor().enable(true).await;

    tag.set_current(TagValue::Bool(false)); // equals the default: no event
    tag.set_current(TagValue::Bool(true));
    tag.set_current(TagValue::Bool(true)); // duplicate: no event
    tag.set_current(TagValue::Bool(false));

    wait_for_events(&events, 6).await;
    tag.monitor().enable(false).await;

    let seen = events.lock().expect("capture lock").clone();
    assert_eq!(seen.len(), 6, "no extra events may appear");

    let kinds: Vec<EventKind> = seen.iter().map(|(kind, _, _)| *kind).collect();
    assert_eq!(kinds[0], EventKind::Change);
    assert!(kinds[1..3].contains(&EventKind::Rising));
    assert!(kinds[1..3].contains(&EventKind::Both));
    assert_eq!(kinds[3], EventKind::Change);
    assert!(kinds[4..6].contains(&EventKind::Falling));
    assert!(kinds[4..6].contains(&EventKind::Both));

    for (_, old, new) in &seen[0..3] {
        assert_eq!(old, &Some(TagValue::Bool(false)));
        assert_eq!(new, &TagValue::Bool(true));
    }
    for (_, old, new) in &seen[3..6] {
        assert_eq!(old, &Some(TagValue::Bool(true)));
        assert_eq!(new, &TagValue::Bool(false));
    }
}

#[tokio::test]
async fn non_bool_changes_emit_change_only() {
    let tag = Tag::new(decl("speed", 1, 0, 2, DataType::Int, None));
    let events: Captured = Arc::default();
    for kind in [EventKind::Rising, EventKind::Falling, EventKind::Both, EventKind::Change] {
        tag.monitor().register_handler(kind, capture_into(&events));
    }
    tag.monitor().enable(true).await;

    tag.set_current(TagValue::Int(1));
    tag.set_current(TagValue::Int(2));
    tag.set_current(TagValue::Int(2));

    wait_for_events(&events, 2).await;
    tag.monitor().enable(false).await;

    let seen = events.lock().expect("capture lock").clone();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(kind, _, _)| *kind == EventKind::Change));
    assert_eq!(seen[0].1, None, "first assignment reports no old value");
    assert_eq!(seen[1].1, Some(TagValue::Int(1)));
}

/// Handlers of one tag observe changes in assignment order.
#[tokio::test]
async fn per_tag_ordering_is_preserved() {
    let tag = Tag::new(decl("counter", 1, 0, 4, DataType::DInt, None));
    let events: Captured = Arc::default();
    tag.monitor().register_handler(EventKind::Change, capture_into(&events));
    tag.monitor().enable(true).await;

    for i in 0..50 {
        tag.set_current(TagValue::DInt(i));
    }
    wait_for_events(&events, 50).await;
    tag.monitor().enable(false).await;

    let seen = events.lock().expect("capture lock").clone();
    let observed: Vec<i32> = seen
        .iter()
        .map(|(_, _, new)| match new {
            TagValue::DInt(v) => *v,
            other => panic!("unexpected value {other:?}"),
        })
        .collect();
    assert_eq!(observed, (0..50).collect::<Vec<i32>>());
}

/// Stopping the consumer drains what is already queued.
#[tokio::test]
async fn stop_drains_the_queue() {
    let tag = Tag::new(decl("level", 1, 0, 2, DataType::Int, None));
    let events: Captured = Arc::default();
    tag.monitor().register_handler(EventKind::Change, capture_into(&events));
    tag.monitor().enable(true).await;

    for i in 0..20 {
        tag.set_current(TagValue::Int(i));
    }
    tag.monitor().enable(false).await;

    assert_eq!(events.lock().expect("capture lock").len(), 20);
}

/// A panicking handler is logged and swallowed; later events still arrive.
#[tokio::test]
async fn handler_panic_does_not_kill_the_consumer() {
    let tag = Tag::new(decl("valve", 1, 0, 2, DataType::Int, None));
    let events: Captured = Arc::default();
    tag.monitor().register_handler(
        EventKind::Change,
        Arc::new(|event: &TagEvent| {
            if event.new_value == TagValue::Int(1) {
                panic!("boom");
            }
        }),
    );
    tag.monitor().register_handler(EventKind::Change, capture_into(&events));
    tag.monitor().enable(true).await;

    tag.set_current(TagValue::Int(1));
    tag.set_current(TagValue::Int(2));

    wait_for_events(&events, 2).await;
    tag.monitor().enable(false).await;
    assert_eq!(events.lock().expect("capture lock").len(), 2);
}

/// Enable and disable are idempotent in both directions.
#[tokio::test]
async fn enable_is_idempotent() {
    let tag = Tag::new(decl("flag", 1, 0, 2, DataType::Int, None));
    let events: Captured = Arc::default();
    tag.monitor().register_handler(EventKind::Change, capture_into(&events));

    tag.monitor().enable(true).await;
    tag.monitor().enable(true).await;
    tag.set_current(TagValue::Int(9));
    wait_for_events(&events, 1).await;

    tag.monitor().enable(false).await;
    tag.monitor().enable(false).await;

    // A fresh enable after a stop keeps working.
    tag.monitor().enable(true).await;
    tag.set_current(TagValue::Int(10));
    wait_for_events(&events, 2).await;
    tag.monitor().enable(false).await;

    assert_eq!(events.lock().expect("capture lock").len(), 2);
}
