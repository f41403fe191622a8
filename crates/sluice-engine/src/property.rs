//! Published properties: the externally visible side of the bridge.
//!
//! A [`PublishedProperty`] owns a publish buffer and reacts to source
//! updates delivered by the dispatcher. The buffer is only mutated
//! while the property's location lock is held; the dispatcher holds it
//! around every callback, and the control-side write path takes it
//! explicitly.

use std::sync::{Arc, Mutex};

use sluice_core::{
    BridgeError, DataValidity, LocationLock, PublishSink, SourceId, Timestamp, TransferVariable,
    UpdateListener, Value, VariableUpdate, VersionNumber, WriteError,
};

use crate::consistency::{ConsistencyGroup, MatchingMode};
use crate::dispatcher::UpdateDispatcher;
use crate::throttle::should_log_data_loss;

/// The externally visible state of one property.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyBuffer {
    /// Last published payload.
    pub value: Value,
    /// Validity of the payload; starts `Faulty` until the first update.
    pub validity: DataValidity,
    /// Last published stamp; strictly monotonic per property.
    pub timestamp: Timestamp,
    /// Value of the correlating field at publish time, if one is bound.
    pub correlation: Option<i64>,
}

impl PropertyBuffer {
    fn initial() -> Self {
        Self {
            value: Value::Int(0),
            validity: DataValidity::Faulty,
            timestamp: Timestamp(0),
            correlation: None,
        }
    }
}

/// State behind the property's own mutex.
///
/// The sibling list is the one field touched from outside the location
/// lock (during wiring); everything else is mutated only with the lock
/// held.
struct Inner {
    group: ConsistencyGroup,
    /// Registered member sources, primary first. Kept alongside the
    /// group because buffer refresh needs the values, not just the
    /// version bookkeeping.
    sources: Vec<Arc<TransferVariable>>,
    primary: Option<Arc<TransferVariable>>,
    correlation: Option<Arc<TransferVariable>>,
    buffer: PropertyBuffer,
    /// Whether the most recent delivered update matched. A single
    /// discarded primary update between matches is normal operation
    /// and must not count as loss.
    last_matched: bool,
    /// Consecutively discarded primary updates beyond the first of a
    /// run. Reset when the primary next matches.
    loss_streak: u64,
    warnings_emitted: u64,
    siblings: Vec<Arc<PublishedProperty>>,
}

/// Builder for [`PublishedProperty`].
pub struct PropertyBuilder {
    name: String,
    location: Arc<dyn LocationLock>,
    matching: MatchingMode,
    sink: Option<Arc<dyn PublishSink>>,
    read_only: bool,
}

impl PropertyBuilder {
    /// Start a builder for a property with the given name and location.
    pub fn new(name: &str, location: Arc<dyn LocationLock>) -> Self {
        Self {
            name: name.to_owned(),
            location,
            matching: MatchingMode::default(),
            sink: None,
            read_only: false,
        }
    }

    /// Set the consistency matching policy.
    pub fn matching(mut self, mode: MatchingMode) -> Self {
        self.matching = mode;
        self
    }

    /// Attach a publish transport.
    pub fn sink(mut self, sink: Arc<dyn PublishSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Reject control-side writes regardless of the primary's direction.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Build the property. Sources are bound afterwards.
    pub fn build(self) -> Arc<PublishedProperty> {
        Arc::new(PublishedProperty {
            name: self.name,
            location: self.location,
            sink: self.sink,
            read_only: self.read_only,
            matching: self.matching,
            inner: Mutex::new(Inner {
                group: ConsistencyGroup::new(self.matching),
                sources: Vec::new(),
                primary: None,
                correlation: None,
                buffer: PropertyBuffer::initial(),
                last_matched: true,
                loss_streak: 0,
                warnings_emitted: 0,
                siblings: Vec::new(),
            }),
        })
    }
}

/// One published property and its update protocol.
pub struct PublishedProperty {
    name: String,
    location: Arc<dyn LocationLock>,
    sink: Option<Arc<dyn PublishSink>>,
    read_only: bool,
    matching: MatchingMode,
    inner: Mutex<Inner>,
}

impl PublishedProperty {
    /// The property's published name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The location lock this property's buffer lives under.
    pub fn location(&self) -> &Arc<dyn LocationLock> {
        &self.location
    }

    /// The configured matching policy.
    pub fn matching(&self) -> MatchingMode {
        self.matching
    }

    /// Bind the primary source and register its update callback.
    ///
    /// Exactly once per property, before the dispatcher starts.
    pub fn bind_primary(
        self: &Arc<Self>,
        dispatcher: &mut UpdateDispatcher,
        variable: &Arc<TransferVariable>,
    ) -> Result<(), BridgeError> {
        {
            let mut inner = self.inner.lock().expect("property state poisoned");
            if inner.primary.is_some() {
                return Err(BridgeError::PrimaryAlreadyBound {
                    property: self.name.clone(),
                });
            }
            inner.primary = Some(Arc::clone(variable));
            inner.group.add(Arc::clone(variable));
            inner.sources.insert(0, Arc::clone(variable));
        }
        dispatcher.add_source(
            Arc::clone(variable),
            Arc::clone(&self.location),
            Arc::clone(self) as Arc<dyn UpdateListener>,
        )?;
        Ok(())
    }

    /// Add a further consistency-group member.
    ///
    /// With `fire_update` the member also triggers the buffer callback;
    /// otherwise it only participates in matching. Either way the
    /// property's location is recorded with the registration: a
    /// sibling's callback on the same source may refresh this buffer,
    /// so the dispatcher must hold this location too.
    pub fn register_source(
        self: &Arc<Self>,
        dispatcher: &mut UpdateDispatcher,
        variable: &Arc<TransferVariable>,
        fire_update: bool,
    ) -> Result<(), BridgeError> {
        {
            let mut inner = self.inner.lock().expect("property state poisoned");
            inner.group.add(Arc::clone(variable));
            inner.sources.push(Arc::clone(variable));
        }
        if fire_update {
            dispatcher.add_source(
                Arc::clone(variable),
                Arc::clone(&self.location),
                Arc::clone(self) as Arc<dyn UpdateListener>,
            )?;
        } else {
            dispatcher.add_silent(Arc::clone(variable), Arc::clone(&self.location))?;
        }
        Ok(())
    }

    /// Bind the correlating field (a scalar integer source).
    ///
    /// Its current value is attached to every publish. Under a real
    /// matching policy the field joins the group and fires the
    /// callback; with no policy it is read passively.
    pub fn set_correlation_source(
        self: &Arc<Self>,
        dispatcher: &mut UpdateDispatcher,
        variable: &Arc<TransferVariable>,
    ) -> Result<(), BridgeError> {
        if !matches!(variable.peek().value, Value::Int(_)) {
            return Err(BridgeError::CorrelationNotScalar {
                source: variable.name().to_owned(),
            });
        }
        {
            let mut inner = self.inner.lock().expect("property state poisoned");
            inner.correlation = Some(Arc::clone(variable));
            if self.matching != MatchingMode::None {
                inner.group.add(Arc::clone(variable));
                inner.sources.push(Arc::clone(variable));
            }
        }
        if self.matching != MatchingMode::None {
            dispatcher.add_source(
                Arc::clone(variable),
                Arc::clone(&self.location),
                Arc::clone(self) as Arc<dyn UpdateListener>,
            )?;
        } else {
            dispatcher.add_unlisted(Arc::clone(variable))?;
        }
        Ok(())
    }

    /// Set the sibling list. Called by the wiring pass before startup.
    pub(crate) fn set_siblings(&self, siblings: Vec<Arc<PublishedProperty>>) {
        let mut inner = self.inner.lock().expect("property state poisoned");
        inner.siblings = siblings;
    }

    /// Ids of writable member sources, used for sibling wiring.
    pub(crate) fn writable_source_ids(&self) -> Vec<SourceId> {
        let inner = self.inner.lock().expect("property state poisoned");
        inner
            .sources
            .iter()
            .filter(|v| v.is_writable())
            .map(|v| v.id())
            .collect()
    }

    /// Whether a primary source was bound.
    pub fn has_primary(&self) -> bool {
        self.inner
            .lock()
            .expect("property state poisoned")
            .primary
            .is_some()
    }

    /// Whether control-side writes are accepted.
    pub fn is_writable(&self) -> bool {
        if self.read_only {
            return false;
        }
        let inner = self.inner.lock().expect("property state poisoned");
        inner
            .primary
            .as_ref()
            .map(|p| p.is_writable())
            .unwrap_or(false)
    }

    /// Snapshot of the publish buffer, taken under the location lock.
    pub fn buffer(&self) -> PropertyBuffer {
        self.location.lock();
        let snapshot = self
            .inner
            .lock()
            .expect("property state poisoned")
            .buffer
            .clone();
        self.location.unlock();
        snapshot
    }

    /// Length of the current run of discarded, unmatched updates.
    pub fn data_loss_streak(&self) -> u64 {
        self.inner.lock().expect("property state poisoned").loss_streak
    }

    /// Number of data-loss warnings actually emitted.
    pub fn warnings_emitted(&self) -> u64 {
        self.inner
            .lock()
            .expect("property state poisoned")
            .warnings_emitted
    }

    /// The control-system-side write path.
    ///
    /// Stores the value into the writable primary under a fresh version,
    /// refreshes and publishes the own buffer, then propagates to
    /// siblings with full lock handling. Never called from the dispatch
    /// thread.
    pub fn write_from_control(&self, value: Value) -> Result<(), WriteError> {
        if !self.is_writable() {
            return Err(WriteError::NotWritable {
                property: self.name.clone(),
            });
        }
        self.location.lock();
        {
            let mut inner = self.inner.lock().expect("property state poisoned");
            let primary = inner
                .primary
                .as_ref()
                .map(Arc::clone)
                .expect("writable property has a primary");
            let version = VersionNumber::now();
            primary.store(VariableUpdate {
                value,
                validity: DataValidity::Ok,
                version,
            });
            // Refresh from the state cell rather than the raw argument:
            // a concurrent sibling write may have superseded this one,
            // and every buffer must derive from the same stored truth.
            let snapshot = primary.peek();
            let stamp = Self::next_stamp(inner.buffer.timestamp, snapshot.version);
            inner.buffer.value = snapshot.value;
            inner.buffer.validity = snapshot.validity;
            inner.buffer.timestamp = stamp;
            inner.buffer.correlation = inner
                .correlation
                .as_ref()
                .and_then(|c| c.peek().value.as_int());
            self.publish(&inner.buffer);
        }
        self.update_others(true);
        self.location.unlock();
        Ok(())
    }

    /// Refresh every sibling's buffer with the unbound update marker.
    ///
    /// With `handle_locking` the own location is released first and each
    /// sibling's location is taken around its callback, so at most one
    /// location lock is ever held. Without it the caller (the dispatch
    /// thread) already holds every involved location.
    pub fn update_others(&self, handle_locking: bool) {
        let siblings = self
            .inner
            .lock()
            .expect("property state poisoned")
            .siblings
            .clone();
        if siblings.is_empty() {
            return;
        }
        if handle_locking {
            self.location.unlock();
        }
        for sibling in &siblings {
            if handle_locking {
                sibling.location.lock();
            }
            sibling.source_updated(None);
            if handle_locking {
                sibling.location.unlock();
            }
        }
        if handle_locking {
            self.location.lock();
        }
    }

    /// Apply one delivered update to the buffer.
    ///
    /// Returns whether the update fired (matched and was published), in
    /// which case the caller propagates to siblings.
    fn refresh_buffer(&self, updated: Option<SourceId>) -> bool {
        let mut inner = self.inner.lock().expect("property state poisoned");
        let primary = inner
            .primary
            .as_ref()
            .map(Arc::clone)
            .unwrap_or_else(|| {
                panic!(
                    "update delivered to '{}' before a primary source was bound",
                    self.name
                )
            });
        let from_primary = updated == Some(primary.id());

        let matched = match updated {
            // Unbound marker: the sibling that propagated already
            // established consistency.
            None => true,
            Some(id) => inner.group.update(id),
        };
        if !matched {
            // Loss is tracked for the primary only. One discarded
            // primary update between matches is the ordinary member
            // interleave; only a second consecutive discard means a
            // consistent set was actually lost.
            if from_primary {
                if !inner.last_matched {
                    inner.loss_streak += 1;
                    if should_log_data_loss(inner.loss_streak) {
                        inner.warnings_emitted += 1;
                        tracing::warn!(
                            property = %self.name,
                            streak = inner.loss_streak,
                            "discarding unmatched update, consistent set incomplete"
                        );
                    }
                }
                inner.last_matched = false;
            }
            return false;
        }
        inner.last_matched = true;
        if from_primary {
            inner.loss_streak = 0;
        }

        let snapshot = primary.peek();
        let validity = inner
            .sources
            .iter()
            .map(|v| v.validity())
            .fold(snapshot.validity, DataValidity::and);

        let stamp = Self::next_stamp(inner.buffer.timestamp, snapshot.version);
        if validity.is_ok() {
            inner.buffer.value = snapshot.value;
        }
        // A faulty update keeps the previous value but still advances
        // the stamp, so consumers see a heartbeat.
        inner.buffer.validity = validity;
        inner.buffer.timestamp = stamp;
        inner.buffer.correlation = inner
            .correlation
            .as_ref()
            .and_then(|c| c.peek().value.as_int());

        self.publish(&inner.buffer);
        true
    }

    /// Stamp for the next publish: the source version, bumped if it
    /// would not be strictly greater than the last published stamp.
    fn next_stamp(last: Timestamp, version: VersionNumber) -> Timestamp {
        let candidate = Timestamp::from(version);
        if candidate <= last {
            last.bumped()
        } else {
            candidate
        }
    }

    fn publish(&self, buffer: &PropertyBuffer) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(err) = sink.send(
            &self.name,
            &buffer.value,
            buffer.timestamp,
            buffer.correlation,
        ) {
            tracing::warn!(property = %self.name, error = %err, "publish failed");
        }
    }
}

impl UpdateListener for PublishedProperty {
    fn source_updated(&self, updated: Option<SourceId>) {
        let fired = self.refresh_buffer(updated);
        // The unbound marker never re-propagates; sibling refresh fans
        // out one level only.
        if fired && updated.is_some() {
            self.update_others(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::transfer_pair;
    use sluice_test_utils::{MemorySink, TestLocation};

    fn write_versioned(
        writer: &sluice_core::VariableWriter,
        value: Value,
        version: u64,
    ) {
        writer
            .write_with(value, DataValidity::Ok, VersionNumber(version))
            .unwrap();
    }

    #[test]
    fn single_source_update_publishes() {
        let mut dispatcher = UpdateDispatcher::new();
        let sink = MemorySink::new();
        let property = PropertyBuilder::new("scope/amplitude", TestLocation::new("scope"))
            .sink(sink.clone())
            .build();
        let (writer, var) = transfer_pair("amplitude", 8, false);
        property.bind_primary(&mut dispatcher, &var).unwrap();

        write_versioned(&writer, Value::Float(1.5), 10);
        dispatcher.update_once().unwrap();

        let buffer = property.buffer();
        assert_eq!(buffer.value, Value::Float(1.5));
        assert_eq!(buffer.validity, DataValidity::Ok);
        assert_eq!(buffer.timestamp, Timestamp(10));
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].property, "scope/amplitude");
    }

    #[test]
    fn primary_can_be_bound_only_once() {
        let mut dispatcher = UpdateDispatcher::new();
        let property =
            PropertyBuilder::new("p", TestLocation::new("loc")).build();
        let (_w1, v1) = transfer_pair("a", 8, false);
        let (_w2, v2) = transfer_pair("b", 8, false);
        property.bind_primary(&mut dispatcher, &v1).unwrap();
        let err = property.bind_primary(&mut dispatcher, &v2).unwrap_err();
        assert!(matches!(err, BridgeError::PrimaryAlreadyBound { .. }));
    }

    #[test]
    fn exact_matching_holds_back_until_versions_agree() {
        let mut dispatcher = UpdateDispatcher::new();
        let sink = MemorySink::new();
        let property = PropertyBuilder::new("p", TestLocation::new("loc"))
            .matching(MatchingMode::ExactVersion)
            .sink(sink.clone())
            .build();
        let (wa, va) = transfer_pair("a", 8, false);
        let (wb, vb) = transfer_pair("b", 8, false);
        property.bind_primary(&mut dispatcher, &va).unwrap();
        property.register_source(&mut dispatcher, &vb, true).unwrap();

        write_versioned(&wa, Value::Int(1), 5);
        dispatcher.update_once().unwrap();
        // The primary update is held back, but a single discard between
        // matches is the ordinary interleave, not data loss.
        assert!(sink.is_empty());
        assert_eq!(property.data_loss_streak(), 0);

        write_versioned(&wb, Value::Int(2), 5);
        dispatcher.update_once().unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(property.buffer().value, Value::Int(1));

        // Two consecutive primary discards with no match in between do
        // count as loss.
        write_versioned(&wa, Value::Int(3), 6);
        dispatcher.update_once().unwrap();
        write_versioned(&wa, Value::Int(4), 7);
        dispatcher.update_once().unwrap();
        assert_eq!(property.data_loss_streak(), 1);
        assert_eq!(property.warnings_emitted(), 1);

        // A match completed by the primary itself clears the streak:
        // deliver the member first, then the primary at the same
        // version.
        write_versioned(&wb, Value::Int(5), 8);
        dispatcher.update_once().unwrap();
        write_versioned(&wa, Value::Int(6), 8);
        dispatcher.update_once().unwrap();
        assert_eq!(property.data_loss_streak(), 0);
        assert_eq!(property.buffer().value, Value::Int(6));
    }

    #[test]
    fn faulty_update_keeps_value_but_advances_stamp() {
        let mut dispatcher = UpdateDispatcher::new();
        let property =
            PropertyBuilder::new("p", TestLocation::new("loc")).build();
        let (writer, var) = transfer_pair("a", 8, false);
        property.bind_primary(&mut dispatcher, &var).unwrap();

        write_versioned(&writer, Value::Int(7), 10);
        dispatcher.update_once().unwrap();
        let before = property.buffer();

        writer
            .write_with(Value::Int(99), DataValidity::Faulty, VersionNumber(20))
            .unwrap();
        dispatcher.update_once().unwrap();
        let after = property.buffer();
        assert_eq!(after.value, Value::Int(7));
        assert_eq!(after.validity, DataValidity::Faulty);
        assert!(after.timestamp > before.timestamp);
    }

    #[test]
    fn stamp_is_bumped_when_version_repeats() {
        let mut dispatcher = UpdateDispatcher::new();
        let property =
            PropertyBuilder::new("p", TestLocation::new("loc")).build();
        let (writer, var) = transfer_pair("a", 8, false);
        property.bind_primary(&mut dispatcher, &var).unwrap();

        write_versioned(&writer, Value::Int(1), 10);
        dispatcher.update_once().unwrap();
        assert_eq!(property.buffer().timestamp, Timestamp(10));

        // Equal version is accepted by the writer but must not stall
        // the published stamp.
        write_versioned(&writer, Value::Int(2), 10);
        dispatcher.update_once().unwrap();
        assert_eq!(property.buffer().timestamp, Timestamp(11));
    }

    #[test]
    fn correlation_value_rides_along() {
        let mut dispatcher = UpdateDispatcher::new();
        let sink = MemorySink::new();
        let property = PropertyBuilder::new("p", TestLocation::new("loc"))
            .matching(MatchingMode::ExactVersion)
            .sink(sink.clone())
            .build();
        let (wp, vp) = transfer_pair("payload", 8, false);
        let (wc, vc) = transfer_pair("pulse", 8, false);
        property.bind_primary(&mut dispatcher, &vp).unwrap();
        property
            .set_correlation_source(&mut dispatcher, &vc)
            .unwrap();

        write_versioned(&wp, Value::Float(3.0), 42);
        write_versioned(&wc, Value::Int(1700), 42);
        dispatcher.update_once().unwrap();

        assert_eq!(sink.last().unwrap().correlation, Some(1700));
        assert_eq!(property.buffer().correlation, Some(1700));
    }

    #[test]
    fn correlation_source_must_be_scalar_int() {
        let mut dispatcher = UpdateDispatcher::new();
        let property =
            PropertyBuilder::new("p", TestLocation::new("loc")).build();
        let (_w, v) = transfer_pair("arr", 8, false);
        // transfer_pair starts variables as Int(0); push an array shape
        // through the state cell to model an array source.
        v.store(VariableUpdate {
            value: Value::IntArray(vec![1, 2]),
            validity: DataValidity::Ok,
            version: VersionNumber(1),
        });
        let err = property
            .set_correlation_source(&mut dispatcher, &v)
            .unwrap_err();
        assert!(matches!(err, BridgeError::CorrelationNotScalar { .. }));
    }

    #[test]
    fn control_write_rejected_without_writable_primary() {
        let mut dispatcher = UpdateDispatcher::new();
        let property =
            PropertyBuilder::new("p", TestLocation::new("loc")).build();
        let (_w, v) = transfer_pair("a", 8, false);
        property.bind_primary(&mut dispatcher, &v).unwrap();
        let err = property.write_from_control(Value::Int(1)).unwrap_err();
        assert!(matches!(err, WriteError::NotWritable { .. }));
    }

    #[test]
    fn control_write_updates_buffer_and_primary() {
        let mut dispatcher = UpdateDispatcher::new();
        let sink = MemorySink::new();
        let property = PropertyBuilder::new("p", TestLocation::new("loc"))
            .sink(sink.clone())
            .build();
        let (_w, v) = transfer_pair("a", 8, true);
        property.bind_primary(&mut dispatcher, &v).unwrap();

        property.write_from_control(Value::Int(33)).unwrap();
        assert_eq!(property.buffer().value, Value::Int(33));
        assert_eq!(v.peek().value, Value::Int(33));
        assert!(v.version().is_set());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn read_only_blocks_control_writes() {
        let mut dispatcher = UpdateDispatcher::new();
        let property = PropertyBuilder::new("p", TestLocation::new("loc"))
            .read_only()
            .build();
        let (_w, v) = transfer_pair("a", 8, true);
        property.bind_primary(&mut dispatcher, &v).unwrap();
        assert!(!property.is_writable());
        assert!(property.write_from_control(Value::Int(1)).is_err());
    }

    #[test]
    fn data_loss_warnings_follow_the_backoff_schedule() {
        let mut dispatcher = UpdateDispatcher::new();
        let property = PropertyBuilder::new("p", TestLocation::new("loc"))
            .matching(MatchingMode::ExactVersion)
            .build();
        let (wa, va) = transfer_pair("a", 256, false);
        let (_wb, vb) = transfer_pair("b", 8, false);
        property.bind_primary(&mut dispatcher, &va).unwrap();
        property.register_source(&mut dispatcher, &vb, true).unwrap();

        // 150 primary updates that never match the silent second
        // member. The first discard is tolerated; the following 149
        // feed the back-off schedule, which emits on every streak up
        // to 10 and then on every 10th up to 100.
        for i in 1..=150u64 {
            write_versioned(&wa, Value::Int(i as i64), i);
            dispatcher.update_once().unwrap();
        }
        assert_eq!(property.data_loss_streak(), 149);
        assert_eq!(property.warnings_emitted(), 19);
    }

    #[test]
    fn failed_publish_is_swallowed() {
        let mut dispatcher = UpdateDispatcher::new();
        let sink = sluice_test_utils::FailingSink::new();
        let property = PropertyBuilder::new("p", TestLocation::new("loc"))
            .sink(sink.clone())
            .build();
        let (writer, var) = transfer_pair("a", 8, false);
        property.bind_primary(&mut dispatcher, &var).unwrap();

        write_versioned(&writer, Value::Int(1), 1);
        dispatcher.update_once().unwrap();
        assert_eq!(sink.attempts(), 1);
        // The buffer still advanced despite the transport failure.
        assert_eq!(property.buffer().value, Value::Int(1));
    }
}
