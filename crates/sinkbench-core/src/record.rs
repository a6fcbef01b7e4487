//! Event records and the producer that leases them to a sink.
//!
//! A record is built immediately before submission and released right after,
//! whatever the sink returned. The sink only borrows the record for the
//! duration of [`EventSink::log`], so it can neither keep nor free it; the
//! [`EventLease`] owned by the producer side is the only thing that does.

use std::cell::Cell;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::SinkError;
use crate::sink::EventSink;

/// Key of the event name field. Present on every record.
pub const NAME_FIELD: &str = "name";
/// Key of the per-batch sequence field.
pub const SEQUENCE_FIELD: &str = "seq";

/// Static illustrative fields added to every produced record.
pub const STATIC_FIELDS: [(&str, &str); 2] = [("result", "Success"), ("origin", "sinkbench")];

// ---------------------------------------------------------------------------
// Event record
// ---------------------------------------------------------------------------

/// One telemetry occurrence: string keys to string values in insertion order.
///
/// Keys are unique. Setting an existing key replaces its value in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    fields: Vec<(String, String)>,
}

impl EventRecord {
    /// Create a record carrying only its name.
    pub fn new(name: &str) -> Self {
        Self {
            fields: vec![(NAME_FIELD.to_string(), name.to_string())],
        }
    }

    /// Set `key` to `value`, returning the previous value if the key existed.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Option<String> {
        let value = value.into();
        if let Some((_, existing)) = self.fields.iter_mut().find(|(k, _)| k == key) {
            return Some(std::mem::replace(existing, value));
        }
        self.fields.push((key.to_string(), value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Event name.
    pub fn name(&self) -> &str {
        self.get(NAME_FIELD).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Serialize for EventRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Builds records and tracks how many leases are still outstanding.
///
/// Counters use `Cell`: the producer belongs to the single driver thread.
#[derive(Debug)]
pub struct EventProducer {
    event_name: String,
    acquired: Cell<u64>,
    released: Cell<u64>,
}

impl EventProducer {
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            acquired: Cell::new(0),
            released: Cell::new(0),
        }
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Build the record for `index`.
    ///
    /// Only the sequence field depends on `index`.
    pub fn build(&self, index: u64) -> EventRecord {
        let mut record = EventRecord::new(&self.event_name);
        for (key, value) in STATIC_FIELDS {
            record.set(key, value);
        }
        record.set(SEQUENCE_FIELD, index.to_string());
        record
    }

    /// Build the record for `index` wrapped in a lease that releases it on drop.
    pub fn acquire(&self, index: u64) -> EventLease<'_> {
        self.acquired.set(self.acquired.get() + 1);
        EventLease {
            record: self.build(index),
            released: false,
            producer: self,
        }
    }

    /// Emit one event: acquire, hand to `sink`, release.
    ///
    /// The lease is released before the sink's result is returned, on the
    /// success path and the failure path alike.
    pub fn emit<S: EventSink + ?Sized>(&self, index: u64, sink: &mut S) -> Result<(), SinkError> {
        let mut lease = self.acquire(index);
        let outcome = sink.log(&lease.record);
        lease.release();
        outcome
    }

    /// Leases handed out so far.
    pub fn acquired(&self) -> u64 {
        self.acquired.get()
    }

    /// Leases released so far. Each lease counts once.
    pub fn released(&self) -> u64 {
        self.released.get()
    }

    /// Leases not yet released.
    pub fn outstanding(&self) -> u64 {
        self.acquired.get() - self.released.get()
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// Scoped ownership of one record.
///
/// Released exactly once: by [`release`](Self::release) or, failing that,
/// on drop. Further releases are no-ops.
#[derive(Debug)]
pub struct EventLease<'p> {
    record: EventRecord,
    released: bool,
    producer: &'p EventProducer,
}

impl EventLease<'_> {
    /// The leased record, or `None` once released.
    pub fn record(&self) -> Option<&EventRecord> {
        (!self.released).then_some(&self.record)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Give the record back to the producer. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            let released = &self.producer.released;
            released.set(released.get() + 1);
        }
    }
}

impl Drop for EventLease<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
