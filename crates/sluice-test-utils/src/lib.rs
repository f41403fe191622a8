//! Test utilities and mock types for Sluice development.
//!
//! Provides mock implementations of the core traits ([`LocationLock`],
//! [`PublishSink`]) and small fixtures for wiring dispatch scenarios
//! without a host control system.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use sluice_core::{LocationLock, PublishError, PublishSink, Timestamp, Value};

/// A real mutual-exclusion lock behind the [`LocationLock`] interface.
///
/// Implemented with a `Mutex<bool>` and a `Condvar` rather than a guard
/// type because the interface is lock/unlock calls that may come from
/// different stack frames. Counts acquisitions so tests can assert the
/// lock was actually taken.
pub struct TestLocation {
    name: String,
    held: Mutex<bool>,
    freed: Condvar,
    acquisitions: AtomicUsize,
}

impl TestLocation {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            held: Mutex::new(false),
            freed: Condvar::new(),
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of successful lock acquisitions so far.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Whether the lock is held right now.
    pub fn is_held(&self) -> bool {
        *self.held.lock().unwrap()
    }
}

impl LocationLock for TestLocation {
    fn lock(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.freed.wait(held).unwrap();
        }
        *held = true;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
    }

    fn unlock(&self) {
        let mut held = self.held.lock().unwrap();
        assert!(*held, "unlock of location '{}' that is not held", self.name);
        *held = false;
        drop(held);
        self.freed.notify_one();
    }
}

/// One captured publish call.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedRecord {
    pub property: String,
    pub value: Value,
    pub timestamp: Timestamp,
    pub correlation: Option<i64>,
}

/// A [`PublishSink`] that records every call for later inspection.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<PublishedRecord>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<PublishedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// The most recent record, if any.
    pub fn last(&self) -> Option<PublishedRecord> {
        self.records.lock().unwrap().last().cloned()
    }
}

impl PublishSink for MemorySink {
    fn send(
        &self,
        property: &str,
        value: &Value,
        timestamp: Timestamp,
        correlation: Option<i64>,
    ) -> Result<(), PublishError> {
        self.records.lock().unwrap().push(PublishedRecord {
            property: property.to_owned(),
            value: value.clone(),
            timestamp,
            correlation,
        });
        Ok(())
    }
}

/// A [`PublishSink`] that fails every call. Counts attempts so tests
/// can verify failures are swallowed rather than escalated.
#[derive(Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PublishSink for FailingSink {
    fn send(
        &self,
        _property: &str,
        _value: &Value,
        _timestamp: Timestamp,
        _correlation: Option<i64>,
    ) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError {
            reason: "transport unavailable".to_owned(),
        })
    }
}
