//! Error types for the Sluice workspace, organized by subsystem:
//! variable writes, dispatch lifecycle, bridge wiring, and publishing.

use std::error::Error;
use std::fmt;

use crate::id::{SourceId, VersionNumber};

/// Errors from the application-side variable writer.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteError {
    /// The update's version is older than the last written version.
    /// Versions on one source must be non-decreasing.
    VersionRegression {
        /// The last version accepted by this writer.
        last: VersionNumber,
        /// The offending version.
        offered: VersionNumber,
    },
    /// The transfer queue is at capacity; the update was not enqueued.
    QueueFull {
        /// Identity of the source whose queue overflowed.
        source: SourceId,
    },
    /// The dispatcher-side reader was dropped.
    Disconnected,
    /// Write attempted through a property whose primary source is not
    /// writable.
    NotWritable {
        /// Name of the property.
        property: String,
    },
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionRegression { last, offered } => {
                write!(f, "version regression: {offered} after {last}")
            }
            Self::QueueFull { source } => write!(f, "transfer queue full for source {source}"),
            Self::Disconnected => write!(f, "reader side disconnected"),
            Self::NotWritable { property } => {
                write!(f, "property '{property}' has no writable primary source")
            }
        }
    }
}

impl Error for WriteError {}

/// Errors from the update dispatcher's lifecycle operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// Registration or a synchronous drain was attempted while the
    /// dispatch loop is running.
    AlreadyRunning,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "dispatch loop is running"),
        }
    }
}

impl Error for DispatchError {}

/// Configuration errors detected while wiring properties into a bridge.
///
/// These are programming/configuration mistakes and are reported at
/// startup; none of them can occur once the dispatch loop runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeError {
    /// A property reached `run()` without a bound primary source.
    MissingPrimarySource {
        /// Name of the offending property.
        property: String,
    },
    /// `bind_primary` was called twice on the same property.
    PrimaryAlreadyBound {
        /// Name of the offending property.
        property: String,
    },
    /// The correlating field must be a scalar integer source.
    CorrelationNotScalar {
        /// Name of the offending source.
        source: String,
    },
    /// A dispatcher lifecycle error surfaced during bridge wiring.
    Dispatch(DispatchError),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrimarySource { property } => {
                write!(f, "property '{property}' has no primary source bound")
            }
            Self::PrimaryAlreadyBound { property } => {
                write!(f, "property '{property}' already has a primary source")
            }
            Self::CorrelationNotScalar { source } => {
                write!(f, "correlating source '{source}' is not a scalar integer")
            }
            Self::Dispatch(e) => write!(f, "{e}"),
        }
    }
}

impl Error for BridgeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Dispatch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DispatchError> for BridgeError {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

/// Failure handing a buffer to the publish transport.
///
/// Publish failures are logged and swallowed by the property; they never
/// cross the dispatch-loop boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishError {
    /// Human-readable description of the transport failure.
    pub reason: String,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publish failed: {}", self.reason)
    }
}

impl Error for PublishError {}
