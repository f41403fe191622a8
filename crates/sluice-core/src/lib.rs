//! Core types and traits for the Sluice process-variable bridge.
//!
//! This is the leaf crate with no internal dependencies. It defines the
//! fundamental abstractions used throughout the Sluice workspace: source
//! identities and version numbers, typed payloads, the transfer-variable
//! channel pair, the listener/lock/transport traits, and error types.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod traits;
pub mod value;
pub mod variable;

pub use error::{BridgeError, DispatchError, PublishError, WriteError};
pub use id::{SourceId, Timestamp, VersionNumber};
pub use traits::{with_location, LocationLock, PublishSink, UpdateListener};
pub use value::{DataValidity, Value};
pub use variable::{
    transfer_pair, TransferVariable, VariableSnapshot, VariableUpdate, VariableWriter,
    DEFAULT_QUEUE_CAPACITY,
};
