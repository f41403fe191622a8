//! Bridge lifecycle against a live application-side writer.
//!
//! Covers the running dispatch loop end to end: updates produced on a
//! foreign thread reach the publish sink, stop() halts delivery, and
//! the deterministic drain path takes over after shutdown.

use std::thread;
use std::time::{Duration, Instant};

use sluice_core::{transfer_pair, Value};
use sluice_engine::{Bridge, PropertyBuilder};
use sluice_test_utils::{MemorySink, TestLocation};

const UPDATES: usize = 50;

fn wait_until(deadline_secs: u64, what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(deadline_secs);
    while !done() {
        if Instant::now() > deadline {
            panic!("{what} did not happen within {deadline_secs}s");
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn running_bridge_carries_updates_to_the_sink() {
    let mut bridge = Bridge::new();
    let sink = MemorySink::new();
    let property = PropertyBuilder::new("bpm/position", TestLocation::new("bpm"))
        .sink(sink.clone())
        .build();
    let (writer, var) = transfer_pair("position", 64, false);
    property.bind_primary(bridge.dispatcher_mut(), &var).unwrap();
    bridge.add_property(property.clone());
    bridge.wire_siblings();
    bridge.run().unwrap();

    let producer = thread::Builder::new()
        .name("app-writer".into())
        .spawn(move || {
            for i in 0..UPDATES {
                writer.write(Value::Int(i as i64)).unwrap();
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
    producer.join().unwrap();

    wait_until(5, "all updates published", || sink.len() >= UPDATES);
    bridge.stop();

    let records = sink.records();
    assert_eq!(records.len(), UPDATES);
    // Paced writes arrive one per delivery, in order, strictly stamped.
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.value, Value::Int(i as i64));
    }
    for pair in records.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
    }
}

#[test]
fn stop_halts_delivery_and_update_once_resumes() {
    let mut bridge = Bridge::new();
    let sink = MemorySink::new();
    let property = PropertyBuilder::new("p", TestLocation::new("loc"))
        .sink(sink.clone())
        .build();
    let (writer, var) = transfer_pair("a", 16, false);
    property.bind_primary(bridge.dispatcher_mut(), &var).unwrap();
    bridge.add_property(property.clone());
    bridge.wire_siblings();

    bridge.run().unwrap();
    writer.write(Value::Int(1)).unwrap();
    wait_until(5, "first update published", || !sink.is_empty());
    bridge.stop();
    bridge.stop();
    assert!(!bridge.is_running());

    // Written after shutdown: stays queued until drained explicitly.
    writer.write(Value::Int(2)).unwrap();
    let settled = sink.len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sink.len(), settled, "delivery happened after stop");

    bridge.update_once().unwrap();
    assert_eq!(property.buffer().value, Value::Int(2));
    assert_eq!(sink.len(), settled + 1);
}

#[test]
fn restart_after_stop_keeps_working() {
    let mut bridge = Bridge::new();
    let sink = MemorySink::new();
    let property = PropertyBuilder::new("p", TestLocation::new("loc"))
        .sink(sink.clone())
        .build();
    let (writer, var) = transfer_pair("a", 16, false);
    property.bind_primary(bridge.dispatcher_mut(), &var).unwrap();
    bridge.add_property(property);
    bridge.wire_siblings();

    bridge.run().unwrap();
    bridge.stop();
    bridge.run().unwrap();
    writer.write(Value::Int(7)).unwrap();
    wait_until(5, "update published after restart", || !sink.is_empty());
    bridge.stop();
}
