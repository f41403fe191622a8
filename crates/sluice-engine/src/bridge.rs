//! The bridge: dispatcher plus property set plus sibling wiring.
//!
//! [`Bridge`] is the assembly point for a complete deployment. Host
//! code builds properties, binds their sources through the bridge's
//! dispatcher, wires siblings once, and starts the loop.

use std::sync::Arc;

use indexmap::IndexMap;

use sluice_core::{BridgeError, SourceId};

use crate::dispatcher::UpdateDispatcher;
use crate::property::PublishedProperty;

/// Owns the dispatcher and every published property.
pub struct Bridge {
    dispatcher: UpdateDispatcher,
    properties: Vec<Arc<PublishedProperty>>,
}

impl Bridge {
    /// Create an empty bridge.
    pub fn new() -> Self {
        Self {
            dispatcher: UpdateDispatcher::new(),
            properties: Vec::new(),
        }
    }

    /// Register a property with the bridge.
    pub fn add_property(&mut self, property: Arc<PublishedProperty>) {
        self.properties.push(property);
    }

    /// The owned dispatcher, for source registration.
    pub fn dispatcher(&self) -> &UpdateDispatcher {
        &self.dispatcher
    }

    /// Mutable access to the dispatcher, for source registration.
    pub fn dispatcher_mut(&mut self) -> &mut UpdateDispatcher {
        &mut self.dispatcher
    }

    /// The registered properties.
    pub fn properties(&self) -> &[Arc<PublishedProperty>] {
        &self.properties
    }

    /// Compute and install every property's sibling set.
    ///
    /// Two properties are siblings when they share a writable member
    /// source. Runs once, after all sources are bound and before the
    /// dispatcher starts. More than one independently writable property
    /// on the same source is a configuration smell: nothing arbitrates
    /// their concurrent writes.
    pub fn wire_siblings(&mut self) {
        let mut users: IndexMap<SourceId, Vec<usize>> = IndexMap::new();
        for (index, property) in self.properties.iter().enumerate() {
            for id in property.writable_source_ids() {
                users.entry(id).or_default().push(index);
            }
        }

        let mut sibling_sets: Vec<Vec<Arc<PublishedProperty>>> =
            vec![Vec::new(); self.properties.len()];
        for (id, indices) in &users {
            if indices.len() < 2 {
                continue;
            }
            let writers = indices
                .iter()
                .filter(|&&i| self.properties[i].is_writable())
                .count();
            if writers > 1 {
                tracing::warn!(
                    source = %id,
                    properties = indices.len(),
                    writers,
                    "multiple writable properties share one source, concurrent writes are unarbitrated"
                );
            }
            for &index in indices {
                for &other in indices {
                    if other != index {
                        sibling_sets[index].push(Arc::clone(&self.properties[other]));
                    }
                }
            }
        }

        for (property, siblings) in self.properties.iter().zip(sibling_sets) {
            property.set_siblings(siblings);
        }
    }

    /// Start the dispatch loop.
    ///
    /// Every property must have a primary source bound; a property that
    /// would receive callbacks without one is a construction error, so
    /// it is rejected here rather than panicking on the loop thread.
    pub fn run(&mut self) -> Result<(), BridgeError> {
        for property in &self.properties {
            if !property.has_primary() {
                return Err(BridgeError::MissingPrimarySource {
                    property: property.name().to_owned(),
                });
            }
        }
        self.dispatcher.run()?;
        tracing::info!(properties = self.properties.len(), "bridge started");
        Ok(())
    }

    /// Stop the dispatch loop. Idempotent.
    pub fn stop(&mut self) {
        self.dispatcher.stop();
    }

    /// Whether the dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }

    /// Synchronously drain ready sources; see
    /// [`UpdateDispatcher::update_once`].
    pub fn update_once(&mut self) -> Result<usize, BridgeError> {
        Ok(self.dispatcher.update_once()?)
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}
