//! The single-threaded update dispatcher.
//!
//! Owns the global set of transfer variables that must be observed.
//! One dedicated thread blocks in a select over every registered
//! readiness channel plus a stop channel; when a source becomes ready
//! the dispatcher resolves the registered callbacks, acquires the
//! external location locks once each in a fixed order, applies the
//! update, and invokes every callback before taking the next event.
//!
//! Registration is single-threaded and happens before [`run`]; the
//! dispatch table is moved into the loop thread, which makes
//! registration-after-start and concurrent [`update_once`] structurally
//! impossible rather than merely rejected.
//!
//! [`run`]: UpdateDispatcher::run
//! [`update_once`]: UpdateDispatcher::update_once

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Select, Sender};
use indexmap::IndexMap;
use smallvec::SmallVec;

use sluice_core::{
    DispatchError, LocationLock, SourceId, TransferVariable, UpdateListener, VariableUpdate,
};

use crate::routing::RoutingDomain;

/// Everything registered for one source identity.
///
/// A source registered twice is not subscribed twice: the additional
/// callback and location are appended here, which is what lets one
/// source feed multiple published properties.
struct Registration {
    variable: Arc<TransferVariable>,
    locations: Vec<Arc<dyn LocationLock>>,
    listeners: Vec<Arc<dyn UpdateListener>>,
    /// Cleared when the writer side disconnects, so the select does not
    /// spin on a dead channel.
    live: bool,
}

/// The dispatch table: registration records plus the fan-out domain.
///
/// Moved into the loop thread by `run()` and recovered by `stop()`.
struct DispatchTable {
    registrations: IndexMap<SourceId, Registration>,
    router: RoutingDomain,
}

impl DispatchTable {
    fn new() -> Self {
        Self {
            registrations: IndexMap::new(),
            router: RoutingDomain::new(),
        }
    }

    /// Deliver one popped update for `id`.
    ///
    /// Fan masters forward into their copy channels instead of normal
    /// dispatch; everything else is applied to the variable's state
    /// cell and handed to the registered callbacks under locks.
    fn dispatch_update(&self, id: SourceId, update: VariableUpdate) {
        if self.router.is_fan_source(id) {
            self.router.send(id, update);
            return;
        }
        let Some(reg) = self.registrations.get(&id) else {
            return;
        };
        reg.variable.store(update);
        Self::invoke(reg, id);
    }

    /// Lock, call back, unlock for one ready source.
    ///
    /// Duplicate location owners across multiple callbacks are locked
    /// only once, in address order, so the same lock is never taken
    /// twice by the dispatch thread.
    fn invoke(reg: &Registration, id: SourceId) {
        let mut locks: SmallVec<[&Arc<dyn LocationLock>; 2]> = reg.locations.iter().collect();
        locks.sort_by_key(|l| Arc::as_ptr(l) as *const () as usize);
        locks.dedup_by(|a, b| Arc::ptr_eq(a, b));

        for lock in &locks {
            lock.lock();
        }
        for listener in &reg.listeners {
            listener.source_updated(Some(id));
        }
        for lock in locks.iter().rev() {
            lock.unlock();
        }
    }
}

/// The update dispatcher.
///
/// Construct, register every source, then call [`run`](Self::run).
/// Dropping the dispatcher stops the loop and joins the thread.
pub struct UpdateDispatcher {
    table: Option<DispatchTable>,
    thread: Option<JoinHandle<DispatchTable>>,
    stop_tx: Option<Sender<()>>,
}

impl UpdateDispatcher {
    /// Create a dispatcher with an empty wait set.
    pub fn new() -> Self {
        Self {
            table: Some(DispatchTable::new()),
            thread: None,
            stop_tx: None,
        }
    }

    /// Whether the dispatch loop is currently running.
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Register interest in a source.
    ///
    /// If the identical source was already registered, the callback and
    /// location owner are appended to the existing registration. Must
    /// be called before [`run`](Self::run).
    pub fn add_source(
        &mut self,
        variable: Arc<TransferVariable>,
        location: Arc<dyn LocationLock>,
        listener: Arc<dyn UpdateListener>,
    ) -> Result<(), DispatchError> {
        let table = self.table.as_mut().ok_or(DispatchError::AlreadyRunning)?;
        let reg = table
            .registrations
            .entry(variable.id())
            .or_insert_with(|| Registration {
                variable,
                locations: Vec::new(),
                listeners: Vec::new(),
                live: true,
            });
        reg.locations.push(location);
        reg.listeners.push(listener);
        tracing::debug!(source = %reg.variable.id(), name = reg.variable.name(),
            callbacks = reg.listeners.len(), "source registered");
        Ok(())
    }

    /// Register interest in a source without a callback, but with a
    /// location owner.
    ///
    /// Used for group members that do not fire updates themselves yet
    /// guard state another callback on the same source may refresh.
    /// The location is taken around every dispatch of the source, like
    /// any location recorded by [`add_source`](Self::add_source).
    pub fn add_silent(
        &mut self,
        variable: Arc<TransferVariable>,
        location: Arc<dyn LocationLock>,
    ) -> Result<(), DispatchError> {
        let table = self.table.as_mut().ok_or(DispatchError::AlreadyRunning)?;
        let reg = table
            .registrations
            .entry(variable.id())
            .or_insert_with(|| Registration {
                variable,
                locations: Vec::new(),
                listeners: Vec::new(),
                live: true,
            });
        reg.locations.push(location);
        Ok(())
    }

    /// Put a source into the wait set without any callback or location.
    ///
    /// Used for fan masters and for passively read sources whose
    /// dispatch touches no guarded state.
    pub fn add_unlisted(
        &mut self,
        variable: Arc<TransferVariable>,
    ) -> Result<(), DispatchError> {
        let table = self.table.as_mut().ok_or(DispatchError::AlreadyRunning)?;
        table
            .registrations
            .entry(variable.id())
            .or_insert_with(|| Registration {
                variable,
                locations: Vec::new(),
                listeners: Vec::new(),
                live: true,
            });
        Ok(())
    }

    /// Whether the source id is in the wait set.
    pub fn contains(&self, id: SourceId) -> bool {
        self.table
            .as_ref()
            .map(|t| t.registrations.contains_key(&id))
            .unwrap_or(false)
    }

    /// Route `master` through the fan-out domain and return a fresh
    /// copy channel.
    ///
    /// The master is registered without callbacks on first use; the
    /// returned copy must be registered like any regular source.
    pub fn fan_out(
        &mut self,
        master: &Arc<TransferVariable>,
    ) -> Result<Arc<TransferVariable>, DispatchError> {
        self.add_unlisted(Arc::clone(master))?;
        let table = self.table.as_mut().ok_or(DispatchError::AlreadyRunning)?;
        Ok(table.router.add_copy(master))
    }

    /// Start the dispatch loop on its own thread and return immediately.
    pub fn run(&mut self) -> Result<(), DispatchError> {
        let table = self.table.take().ok_or(DispatchError::AlreadyRunning)?;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("sluice-dispatch".into())
            .spawn(move || run_loop(table, stop_rx))
            .expect("failed to spawn dispatch thread");
        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
        Ok(())
    }

    /// Stop the dispatch loop and join its thread.
    ///
    /// Interrupts the blocking wait, guarantees that no callback runs
    /// after this returns, and recovers the dispatch table so
    /// [`update_once`](Self::update_once) works again. Idempotent. A
    /// panic raised by a callback is a fatal programming error and is
    /// resumed on the calling thread.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The loop may already have exited; a dead channel is fine.
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(table) => self.table = Some(table),
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
    }

    /// Synchronously drain every source that is currently ready.
    ///
    /// Non-blocking; intended for deterministic testing, not production
    /// use. Each ready source is drained to its newest queued update
    /// (fan masters forward every queued update so copies see the full
    /// sequence). Returns the number of deliveries. Rejected while the
    /// loop is running.
    pub fn update_once(&mut self) -> Result<usize, DispatchError> {
        let table = self.table.as_mut().ok_or(DispatchError::AlreadyRunning)?;
        let mut delivered = 0;
        for idx in 0..table.registrations.len() {
            let (id, variable) = {
                let (id, reg) = table
                    .registrations
                    .get_index(idx)
                    .expect("registration index in range");
                (*id, Arc::clone(&reg.variable))
            };
            if table.router.is_fan_source(id) {
                while let Some(update) = variable.try_take_one() {
                    table.router.send(id, update);
                    delivered += 1;
                }
            } else if variable.read_latest() {
                let reg = table
                    .registrations
                    .get(&id)
                    .expect("registration present for id");
                DispatchTable::invoke(reg, id);
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

impl Default for UpdateDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UpdateDispatcher {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let result = handle.join();
            if result.is_err() && !thread::panicking() {
                panic!("dispatch thread panicked");
            }
        }
    }
}

/// The dispatch loop. Runs until the stop channel signals or closes.
///
/// The select is rebuilt every iteration over the live registrations,
/// which re-arms read intent on any still-pending source before the
/// thread blocks again. Updates are popped one at a time so that
/// exact-version matching observes every version, and one delivery
/// (including sibling propagation inside the callbacks) completes
/// before the next event is taken.
fn run_loop(mut table: DispatchTable, stop_rx: Receiver<()>) -> DispatchTable {
    let mut slots: Vec<SourceId> = Vec::with_capacity(table.registrations.len());
    loop {
        if stop_rx.try_recv().is_ok() {
            return table;
        }

        slots.clear();
        let event = {
            let mut select = Select::new();
            let stop_index = select.recv(&stop_rx);
            for (id, reg) in &table.registrations {
                if reg.live {
                    select.recv(reg.variable.ready_channel());
                    slots.push(*id);
                }
            }

            let op = select.select();
            let index = op.index();
            if index == stop_index {
                let _ = op.recv(&stop_rx);
                return table;
            }
            let id = slots[index - 1];
            let reg = table
                .registrations
                .get(&id)
                .expect("selected slot has a registration");
            (id, op.recv(reg.variable.ready_channel()))
        };

        match event {
            (id, Ok(update)) => table.dispatch_update(id, update),
            (id, Err(_)) => {
                // Writer disconnected; drop the channel from the wait
                // set or the select would report it ready forever.
                if let Some(reg) = table.registrations.get_mut(&id) {
                    reg.live = false;
                }
            }
        }
    }
}
