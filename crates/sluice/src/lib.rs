//! Sluice: an update-dispatch and consistency-matching bridge between
//! application process variables and published control-system properties.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Sluice sub-crates. For most users, adding `sluice` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::{Arc, Condvar, Mutex};
//! use sluice::prelude::*;
//!
//! // A coarse resource lock owned by the host runtime.
//! struct PanelLock {
//!     held: Mutex<bool>,
//!     freed: Condvar,
//! }
//! impl PanelLock {
//!     fn new() -> Arc<Self> {
//!         Arc::new(Self { held: Mutex::new(false), freed: Condvar::new() })
//!     }
//! }
//! impl LocationLock for PanelLock {
//!     fn lock(&self) {
//!         let mut held = self.held.lock().unwrap();
//!         while *held {
//!             held = self.freed.wait(held).unwrap();
//!         }
//!         *held = true;
//!     }
//!     fn unlock(&self) {
//!         *self.held.lock().unwrap() = false;
//!         self.freed.notify_one();
//!     }
//! }
//!
//! // One application-side variable feeding one published property.
//! let mut bridge = Bridge::new();
//! let (writer, variable) = transfer_pair("amplitude", 16, false);
//! let property = PropertyBuilder::new("scope/amplitude", PanelLock::new()).build();
//! property.bind_primary(bridge.dispatcher_mut(), &variable).unwrap();
//! bridge.add_property(property.clone());
//! bridge.wire_siblings();
//!
//! // The application writes; the dispatcher carries it to the buffer.
//! writer.write(Value::Float(0.75)).unwrap();
//! bridge.update_once().unwrap();
//! assert_eq!(property.buffer().value, Value::Float(0.75));
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the
//! prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `sluice-core` | IDs, versions, values, transfer variables, core traits |
//! | [`engine`] | `sluice-engine` | Dispatcher, consistency groups, properties, routing |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`sluice-core`).
///
/// Contains source identities, version numbers, typed values, the
/// transfer-variable channel pair, and the fundamental traits
/// ([`types::UpdateListener`], [`types::LocationLock`],
/// [`types::PublishSink`]).
pub use sluice_core as types;

/// The dispatch and matching engine (`sluice-engine`).
///
/// [`engine::UpdateDispatcher`] for the blocking loop,
/// [`engine::PublishedProperty`] for the buffer protocol,
/// [`engine::Bridge`] for assembly and sibling wiring.
pub use sluice_engine as engine;

/// Common imports for typical Sluice usage.
///
/// ```rust
/// use sluice::prelude::*;
/// ```
///
/// This imports the most frequently used types: the bridge and property
/// builders, the transfer-variable pair constructor, core traits, and
/// value types.
pub mod prelude {
    // Core types and traits
    pub use sluice_core::{
        transfer_pair, DataValidity, LocationLock, PublishSink, SourceId, Timestamp,
        TransferVariable, UpdateListener, Value, VariableUpdate, VariableWriter, VersionNumber,
    };

    // Engine surface
    pub use sluice_engine::{
        Bridge, ConsistencyGroup, MatchingMode, PropertyBuilder, PublishedProperty,
        UpdateDispatcher,
    };
}
