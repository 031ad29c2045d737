//! Per-storage-name read gates for DEPOT.
//!
//! A [`GateRegistry`] maps storage names to gates that count active readers
//! and hold deferred actions. A delete or a replacing upload never removes a
//! physical file while a download is streaming it: the removal is deferred
//! through the gate and fires once the last reader releases.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

/// Action queued against a gate to run once it becomes unreferenced.
#[derive(Debug)]
pub enum DeferredAction {
    /// Delete a physical file. Failure is logged, never propagated; the file
    /// may already be gone.
    RemoveFile(PathBuf),
}

impl DeferredAction {
    /// Execute the action. Runs outside any registry lock.
    fn run(self) {
        match self {
            DeferredAction::RemoveFile(path) => match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed stale file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove {}: {}", path.display(), e),
            },
        }
    }
}

/// State of one gate. Exists in the registry only while referenced.
#[derive(Debug, Default)]
struct GateState {
    readers: usize,
    pending: VecDeque<DeferredAction>,
}

/// Process-wide registry of read gates, keyed by storage name.
///
/// The registry lock guards only map lookups and counter updates; deferred
/// actions always execute after the lock is dropped.
#[derive(Debug, Default)]
pub struct GateRegistry {
    gates: Mutex<HashMap<String, GateState>>,
}

impl GateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, GateState>> {
        // A poisoned lock only means a panic elsewhere; the map itself is
        // still consistent because every critical section is panic-free.
        self.gates.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire a read reference on the gate for `storage_name`, creating the
    /// gate if absent.
    ///
    /// The returned handle releases on drop, on every exit path. While any
    /// handle is live, deferred actions for this storage name are queued
    /// instead of executed.
    pub fn acquire_read(self: &Arc<Self>, storage_name: &str) -> ReadHandle {
        let mut gates = self.lock();
        let state = gates.entry(storage_name.to_string()).or_default();
        state.readers += 1;
        debug!(
            "gate {} acquired, {} active reader(s)",
            storage_name, state.readers
        );
        drop(gates);

        ReadHandle {
            registry: Arc::clone(self),
            storage_name: storage_name.to_string(),
        }
    }

    /// Run `action` now if the gate for `storage_name` is unreferenced,
    /// otherwise queue it to run when the last reader releases.
    pub fn defer(&self, storage_name: &str, action: DeferredAction) {
        let immediate = {
            let mut gates = self.lock();
            match gates.get_mut(storage_name) {
                Some(state) if state.readers > 0 => {
                    debug!(
                        "gate {} busy ({} reader(s)), deferring action",
                        storage_name, state.readers
                    );
                    state.pending.push_back(action);
                    None
                }
                _ => Some(action),
            }
        };

        if let Some(action) = immediate {
            action.run();
        }
    }

    /// Release one read reference. At zero, drains the pending actions in
    /// FIFO order and removes the gate.
    fn release_read(&self, storage_name: &str) {
        let drained = {
            let mut gates = self.lock();
            let Some(state) = gates.get_mut(storage_name) else {
                warn!("release on unknown gate {}", storage_name);
                return;
            };
            state.readers -= 1;
            if state.readers == 0 {
                gates.remove(storage_name).map(|state| state.pending)
            } else {
                None
            }
        };

        if let Some(pending) = drained {
            for action in pending {
                action.run();
            }
        }
    }

    /// Number of active readers on a gate (0 if the gate does not exist).
    pub fn active_readers(&self, storage_name: &str) -> usize {
        self.lock()
            .get(storage_name)
            .map(|s| s.readers)
            .unwrap_or(0)
    }

    /// Number of live gates.
    pub fn gate_count(&self) -> usize {
        self.lock().len()
    }
}

/// A live read reference on a gate.
///
/// Dropping the handle releases the reference; when the last reference for a
/// storage name goes away, its deferred actions run and the gate is removed.
#[derive(Debug)]
pub struct ReadHandle {
    registry: Arc<GateRegistry>,
    storage_name: String,
}

impl ReadHandle {
    /// The storage name this handle guards.
    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }
}

impl Drop for ReadHandle {
    fn drop(&mut self) {
        self.registry.release_read(&self.storage_name);
    }
}
