// Shared helpers for integration tests

#![allow(dead_code)]

use rastro::config::RecorderConfig;
use rastro::event::Record;
use rastro::export::ManualClock;
use rastro::heap::HeapObject;
use rastro::sink::MemorySink;
use rastro::{HostValue, TraceSession};
use std::collections::HashSet;

/// Session over an empty global object, recording into memory
pub fn memory_session() -> (TraceSession, MemorySink, ManualClock) {
    let global = HeapObject::plain();
    memory_session_with(&HostValue::object(&global), &RecorderConfig::default())
}

pub fn memory_session_with(
    global: &HostValue,
    config: &RecorderConfig,
) -> (TraceSession, MemorySink, ManualClock) {
    let sink = MemorySink::new();
    let clock = ManualClock::new();
    let session = TraceSession::start_with_clock(
        global,
        config,
        Box::new(sink.clone()),
        Box::new(clock.clone()),
    )
    .expect("session starts");
    (session, sink, clock)
}

/// Assert the stream never references an id before it is described
///
/// Description records may point at ids whose own record follows (an
/// ancestor still under construction), but every such id must be described
/// before the next non-description record.
pub fn assert_no_forward_references(records: &[Record]) {
    let mut described: HashSet<u64> = HashSet::new();
    let mut pending: HashSet<u64> = HashSet::new();

    for (index, record) in records.iter().enumerate() {
        if let Some(id) = record.describes() {
            described.insert(id);
        }
        match record {
            Record::Object(_)
            | Record::Function(_)
            | Record::FunctionSource { .. }
            | Record::Exotic { .. } => {
                pending.extend(record.references());
            }
            _ => {
                for id in pending.drain() {
                    assert!(
                        described.contains(&id),
                        "id {} referenced by a description is never described before record #{}",
                        id,
                        index
                    );
                }
                for id in record.references() {
                    assert!(
                        described.contains(&id),
                        "record #{} references undescribed id {}",
                        index,
                        id
                    );
                }
            }
        }
    }
}

/// Step tags of every event record, in order
pub fn steps(records: &[Record]) -> Vec<&'static str> {
    records
        .iter()
        .filter_map(|r| match r {
            Record::Step(event) => Some(event.step()),
            _ => None,
        })
        .collect()
}
