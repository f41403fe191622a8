//! Core abstraction traits: the per-property update callback, the
//! host-owned location lock, and the publish transport.

use crate::error::PublishError;
use crate::id::{SourceId, Timestamp};
use crate::value::Value;

/// The narrow per-property callback interface.
///
/// The dispatcher and the consistency group never need to know the
/// concrete property kind; they only hand over the identity of the
/// source that became ready. `None` is the unbound update marker used
/// for sibling propagation: it bypasses the consistency check so the
/// sibling refreshes unconditionally.
///
/// Called with the property's location lock already held.
pub trait UpdateListener: Send + Sync {
    /// React to one delivered source update (or the unbound marker).
    fn source_updated(&self, updated: Option<SourceId>);
}

/// An external, coarse-grained resource lock ("location" lock).
///
/// Lock handles are owned by the host runtime and consumed opaquely;
/// the engine never holds two different location locks at the same
/// time except for the hand-off inside sibling propagation, and always
/// releases before re-acquiring rather than nesting.
pub trait LocationLock: Send + Sync {
    /// Acquire the lock, blocking until it is available.
    fn lock(&self);
    /// Release the lock. The caller must currently hold it.
    fn unlock(&self);
}

/// Fire-and-forget publish transport for buffer updates.
///
/// Failures are logged by the caller and never escalated as a
/// dispatch-loop error.
pub trait PublishSink: Send + Sync {
    /// Hand one published buffer to the transport.
    fn send(
        &self,
        property: &str,
        value: &Value,
        timestamp: Timestamp,
        correlation: Option<i64>,
    ) -> Result<(), PublishError>;
}

/// Run a closure with the given location lock held.
///
/// Convenience for host code and tests; the dispatch loop manages its
/// lock set explicitly because duplicate owners must be locked only
/// once and in a fixed order.
pub fn with_location<R>(lock: &dyn LocationLock, f: impl FnOnce() -> R) -> R {
    lock.lock();
    let r = f();
    lock.unlock();
    r
}
