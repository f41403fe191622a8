//! Fan-out routing: one transfer source feeding several independent
//! single-reader delivery channels.
//!
//! A variable that must be observed by more than one consumer context
//! is replaced by a master plus N copy channels. The dispatcher keeps
//! only the master in its wait set for the original id; each copy is a
//! regular transfer variable with its own identity. All copies of one
//! logical update carry the master's version number, and the payload
//! is moved (not cloned) into the final copy.

use std::sync::Arc;

use indexmap::IndexMap;

use sluice_core::{
    transfer_pair, SourceId, TransferVariable, VariableUpdate, VariableWriter,
    DEFAULT_QUEUE_CAPACITY,
};

struct Fan {
    master: Arc<TransferVariable>,
    copies: Vec<VariableWriter>,
}

/// The set of fanned-out sources known to one dispatcher.
#[derive(Default)]
pub struct RoutingDomain {
    fans: IndexMap<SourceId, Fan>,
}

impl RoutingDomain {
    /// Create an empty routing domain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more copy destination for `master`.
    ///
    /// The first call for a given master turns it into a fan source.
    /// The returned variable is an independent single-reader channel
    /// carrying the same version numbers as the master.
    pub fn add_copy(&mut self, master: &Arc<TransferVariable>) -> Arc<TransferVariable> {
        let fan = self.fans.entry(master.id()).or_insert_with(|| Fan {
            master: Arc::clone(master),
            copies: Vec::new(),
        });
        let name = format!("{}/fan{}", master.name(), fan.copies.len());
        let (writer, reader) = transfer_pair(name, DEFAULT_QUEUE_CAPACITY, master.is_writable());
        fan.copies.push(writer);
        reader
    }

    /// Whether `id` is the master of a registered fan-out.
    pub fn is_fan_source(&self, id: SourceId) -> bool {
        self.fans.contains_key(&id)
    }

    /// Number of copy destinations registered for `id`.
    pub fn copy_count(&self, id: SourceId) -> usize {
        self.fans.get(&id).map(|f| f.copies.len()).unwrap_or(0)
    }

    /// Forward one update of a fan master into every copy channel.
    ///
    /// Returns `false` if `id` is not a fan source. The master's state
    /// cell only tracks version and validity; the payload is cloned
    /// into all copies but the last, which receives it by move.
    pub fn send(&self, id: SourceId, update: VariableUpdate) -> bool {
        let Some(fan) = self.fans.get(&id) else {
            return false;
        };
        fan.master.store_meta(update.validity, update.version);
        let Some((last, rest)) = fan.copies.split_last() else {
            return true;
        };
        for copy in rest {
            if let Err(e) =
                copy.write_with(update.value.clone(), update.validity, update.version)
            {
                tracing::warn!(copy = copy.name(), error = %e, "fan-out delivery failed");
            }
        }
        if let Err(e) = last.write_with(update.value, update.validity, update.version) {
            tracing::warn!(copy = last.name(), error = %e, "fan-out delivery failed");
        }
        true
    }
}
