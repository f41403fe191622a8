//! The transfer-variable channel pair.
//!
//! A transfer variable is an addressable, versioned, independently
//! written variable. The application holds the [`VariableWriter`] and
//! pushes updates into a bounded SPSC queue; the dispatcher holds the
//! [`TransferVariable`] reader end, waits on its [`ready_channel`]
//! inside a multi-source select, and folds delivered updates into the
//! variable's current-state cell.
//!
//! [`ready_channel`]: TransferVariable::ready_channel

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::WriteError;
use crate::id::{SourceId, VersionNumber};
use crate::value::{DataValidity, Value};

/// Default capacity of a transfer queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// One queued update: payload, validity flag, and version stamp.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableUpdate {
    /// The typed payload.
    pub value: Value,
    /// Whether the producer considers the payload trustworthy.
    pub validity: DataValidity,
    /// Monotonic version stamp; never [`VersionNumber::UNSET`].
    pub version: VersionNumber,
}

/// A consistent copy of a variable's current state.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableSnapshot {
    /// The current payload.
    pub value: Value,
    /// The current validity flag.
    pub validity: DataValidity,
    /// The version of the last applied update, or the sentinel if the
    /// variable was never written.
    pub version: VersionNumber,
}

struct VariableState {
    value: Value,
    validity: DataValidity,
    version: VersionNumber,
}

/// Dispatcher-side end of a transfer variable.
///
/// Holds the update queue receiver and the current-state cell. The
/// state cell is mutated by the dispatch thread when it applies a
/// queued update, and by the control-system write path under the
/// owning location lock.
pub struct TransferVariable {
    id: SourceId,
    name: String,
    writable: bool,
    rx: Receiver<VariableUpdate>,
    state: Mutex<VariableState>,
}

/// Application-side end of a transfer variable.
///
/// Enforces the non-decreasing-version invariant so the dispatcher can
/// rely on it without re-checking.
pub struct VariableWriter {
    id: SourceId,
    name: String,
    tx: Sender<VariableUpdate>,
    last_version: Mutex<VersionNumber>,
}

/// Build a transfer-variable pair with the given queue capacity.
///
/// `writable` marks variables the control-system side may write back
/// to; it drives sibling wiring, not transfer mechanics. The initial
/// state carries the never-written sentinel and a zero scalar matching
/// no shape in particular; properties must not publish it.
pub fn transfer_pair(
    name: impl Into<String>,
    capacity: usize,
    writable: bool,
) -> (VariableWriter, Arc<TransferVariable>) {
    let name = name.into();
    let id = SourceId::next();
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let reader = Arc::new(TransferVariable {
        id,
        name: name.clone(),
        writable,
        rx,
        state: Mutex::new(VariableState {
            value: Value::Int(0),
            validity: DataValidity::Faulty,
            version: VersionNumber::UNSET,
        }),
    });
    let writer = VariableWriter {
        id,
        name,
        tx,
        last_version: Mutex::new(VersionNumber::UNSET),
    };
    (writer, reader)
}

impl TransferVariable {
    /// Stable identity of this source.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Human-readable name (for diagnostics only).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the control-system side may write this variable back.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The readiness channel used inside a multi-source select.
    pub fn ready_channel(&self) -> &Receiver<VariableUpdate> {
        &self.rx
    }

    /// Pop exactly one queued update without applying it.
    ///
    /// Used by the blocking dispatch loop, which must deliver updates
    /// one at a time so exact-version matching sees every version.
    pub fn try_take_one(&self) -> Option<VariableUpdate> {
        self.rx.try_recv().ok()
    }

    /// Drain the queue to the newest update and apply it.
    ///
    /// Returns whether a new value was available. This is the
    /// non-blocking `update_once` path; intermediate queued updates
    /// are coalesced away.
    pub fn read_latest(&self) -> bool {
        let mut latest = None;
        while let Ok(update) = self.rx.try_recv() {
            latest = Some(update);
        }
        match latest {
            Some(update) => {
                self.store(update);
                true
            }
            None => false,
        }
    }

    /// Apply an update to the current-state cell.
    ///
    /// Called by the dispatch thread after popping a queued update, and
    /// by the control-system write path under the location lock. Updates
    /// older than the current state are ignored.
    pub fn store(&self, update: VariableUpdate) {
        let mut state = self.state.lock().expect("variable state poisoned");
        if update.version < state.version {
            return;
        }
        state.value = update.value;
        state.validity = update.validity;
        state.version = update.version;
    }

    /// Advance validity and version without touching the payload.
    ///
    /// Used by the fan-out router, which forwards the payload into its
    /// copy channels (moving it into the last one) and only tracks
    /// transfer metadata on the master.
    pub fn store_meta(&self, validity: DataValidity, version: VersionNumber) {
        let mut state = self.state.lock().expect("variable state poisoned");
        if version < state.version {
            return;
        }
        state.validity = validity;
        state.version = version;
    }

    /// A consistent copy of the current state.
    pub fn peek(&self) -> VariableSnapshot {
        let state = self.state.lock().expect("variable state poisoned");
        VariableSnapshot {
            value: state.value.clone(),
            validity: state.validity,
            version: state.version,
        }
    }

    /// The version of the last applied update.
    pub fn version(&self) -> VersionNumber {
        self.state.lock().expect("variable state poisoned").version
    }

    /// The validity flag of the last applied update.
    pub fn validity(&self) -> DataValidity {
        self.state.lock().expect("variable state poisoned").validity
    }
}

impl std::fmt::Debug for TransferVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferVariable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("writable", &self.writable)
            .finish()
    }
}

impl VariableWriter {
    /// Identity of the source this writer feeds.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Human-readable name (for diagnostics only).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a valid update stamped with the current clock.
    pub fn write(&self, value: Value) -> Result<VersionNumber, WriteError> {
        self.write_with(value, DataValidity::Ok, VersionNumber::now())
    }

    /// Enqueue a faulty update stamped with the current clock.
    ///
    /// The payload still travels so consumers observe a heartbeat.
    pub fn write_faulty(&self, value: Value) -> Result<VersionNumber, WriteError> {
        self.write_with(value, DataValidity::Faulty, VersionNumber::now())
    }

    /// Enqueue an update with an explicit validity flag and version.
    ///
    /// Versions must be non-decreasing per source; offering an older
    /// version is a [`WriteError::VersionRegression`].
    pub fn write_with(
        &self,
        value: Value,
        validity: DataValidity,
        version: VersionNumber,
    ) -> Result<VersionNumber, WriteError> {
        let mut last = self.last_version.lock().expect("writer state poisoned");
        if version < *last {
            return Err(WriteError::VersionRegression {
                last: *last,
                offered: version,
            });
        }
        let update = VariableUpdate {
            value,
            validity,
            version,
        };
        match self.tx.try_send(update) {
            Ok(()) => {
                *last = version;
                Ok(version)
            }
            Err(TrySendError::Full(_)) => Err(WriteError::QueueFull { source: self.id }),
            Err(TrySendError::Disconnected(_)) => Err(WriteError::Disconnected),
        }
    }
}

impl std::fmt::Debug for VariableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableWriter")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
