//! Strongly-typed identifiers, version numbers, and publish timestamps.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counter for unique [`SourceId`] allocation.
static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a transfer source.
///
/// Allocated from a monotonic atomic counter via [`SourceId::next`].
/// Two distinct sources always have different IDs, even when they carry
/// the same name (fan-out copies of one variable are separate sources).
/// Opaque, comparable, hashable; used as the key of the dispatcher's
/// registration table and of consistency-group membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate a fresh, unique source ID.
    ///
    /// Each call returns an ID that has never been returned before
    /// within this process. Thread-safe.
    pub fn next() -> Self {
        Self(SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic, timestamp-derived version stamp of a transfer source.
///
/// Versions observed on one source are non-decreasing over time as seen
/// by the dispatcher. [`VersionNumber::UNSET`] is the "never written"
/// sentinel and compares less than every real version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionNumber(pub u64);

impl VersionNumber {
    /// The "never written" sentinel. Compares less than every real version.
    pub const UNSET: VersionNumber = VersionNumber(0);

    /// Sample the system clock as a nanosecond version stamp.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Self(nanos.max(1))
    }

    /// Whether this version carries the never-written sentinel.
    pub fn is_set(&self) -> bool {
        *self != Self::UNSET
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "unset")
        }
    }
}

/// Externally published nanosecond timestamp of a property buffer.
///
/// Derived from the primary source's [`VersionNumber`] and bumped by the
/// smallest representable increment when it would collide with the
/// previously published stamp, so downstream consistency watchdogs always
/// observe strictly increasing timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The next representable timestamp.
    pub fn bumped(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<VersionNumber> for Timestamp {
    fn from(v: VersionNumber) -> Self {
        Self(v.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
