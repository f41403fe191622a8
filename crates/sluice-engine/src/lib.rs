//! Update-dispatch and consistency-matching engine for the Sluice bridge.
//!
//! A single dispatch thread waits on every registered transfer variable,
//! applies per-property consistency policies, serializes callbacks under
//! host-owned location locks, and keeps multi-mapped properties
//! value-identical through sibling propagation.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod bridge;
pub mod consistency;
pub mod dispatcher;
pub mod property;
pub mod routing;
pub mod throttle;

pub use bridge::Bridge;
pub use consistency::{ConsistencyGroup, MatchingMode};
pub use dispatcher::UpdateDispatcher;
pub use property::{PropertyBuffer, PropertyBuilder, PublishedProperty};
pub use routing::RoutingDomain;
pub use throttle::should_log_data_loss;
