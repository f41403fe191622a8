//! Sibling propagation under concurrent control-side writers.
//!
//! Two properties mirror the same writable source from different
//! locations. Two threads hammer `write_from_control` on opposite
//! properties; the lock protocol must neither deadlock nor leave the
//! buffers diverged once the writers settle.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sluice_core::{transfer_pair, Value};
use sluice_engine::{Bridge, PropertyBuilder, PublishedProperty};
use sluice_test_utils::TestLocation;

const WRITES_PER_THREAD: i64 = 200;

fn writer_thread(property: Arc<PublishedProperty>, base: i64) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(format!("control-{base}"))
        .spawn(move || {
            for i in 0..WRITES_PER_THREAD {
                property.write_from_control(Value::Int(base + i)).unwrap();
            }
        })
        .expect("failed to spawn control writer")
}

#[test]
fn concurrent_sibling_writes_converge_without_deadlock() {
    let mut bridge = Bridge::new();
    let (_writer, shared) = transfer_pair("setpoint", 16, true);

    let p1 = PropertyBuilder::new("panel/setpoint", TestLocation::new("panel")).build();
    let p2 = PropertyBuilder::new("rack/setpoint", TestLocation::new("rack")).build();
    p1.bind_primary(bridge.dispatcher_mut(), &shared).unwrap();
    p2.bind_primary(bridge.dispatcher_mut(), &shared).unwrap();
    bridge.add_property(p1.clone());
    bridge.add_property(p2.clone());
    bridge.wire_siblings();

    let h1 = writer_thread(p1.clone(), 1_000);
    let h2 = writer_thread(p2.clone(), 2_000);

    // A deadlock shows up as the writers never finishing; poll with a
    // deadline instead of blocking the test runner forever.
    let deadline = Instant::now() + Duration::from_secs(10);
    while !(h1.is_finished() && h2.is_finished()) {
        if Instant::now() > deadline {
            panic!("control writers did not finish within 10s, lock protocol suspect");
        }
        thread::sleep(Duration::from_millis(10));
    }
    h1.join().unwrap();
    h2.join().unwrap();

    // After the dust settles the siblings must agree with each other
    // and with the shared source.
    let b1 = p1.buffer();
    let b2 = p2.buffer();
    assert_eq!(b1.value, b2.value, "sibling buffers diverged");
    assert_eq!(b1.value, shared.peek().value);
}

#[test]
fn three_way_siblings_all_mirror_one_write() {
    let mut bridge = Bridge::new();
    let (_writer, shared) = transfer_pair("threshold", 16, true);

    let props: Vec<Arc<PublishedProperty>> = (0..3)
        .map(|i| {
            let p = PropertyBuilder::new(
                &format!("loc{i}/threshold"),
                TestLocation::new(&format!("loc{i}")),
            )
            .build();
            p.bind_primary(bridge.dispatcher_mut(), &shared).unwrap();
            bridge.add_property(p.clone());
            p
        })
        .collect();
    bridge.wire_siblings();

    props[1].write_from_control(Value::Int(77)).unwrap();
    for p in &props {
        assert_eq!(p.buffer().value, Value::Int(77), "{} diverged", p.name());
    }
}
