//! Trigger Registry Module
//!
//! Ephemeral callbacks fired when a manager queries the backing store, or
//! observes a save or delete. Meant for tests and instrumentation that need
//! to assert how often the store was hit.
//!
//! Registration and execution are not synchronized beyond what `Mutex`
//! requires to compile. Actions run on the thread of the triggering call,
//! in no particular order, and may run before or after the operation
//! itself completes. A panicking action does not undo the operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// == Trigger Condition ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerCondition {
    /// The manager read from the backing store
    Query,
    /// A row was saved
    Save,
    /// A row was deleted
    Delete,
}

/// Callback invoked with the name of the model whose manager fired it.
pub type TriggerAction = Arc<dyn Fn(&'static str) + Send + Sync>;

// == Trigger Registry ==
#[derive(Default)]
pub struct TriggerRegistry {
    next_id: AtomicU64,
    triggers: Mutex<HashMap<u64, (TriggerCondition, TriggerAction)>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // == Register ==
    /// Registers `action` for `condition` until the returned guard drops.
    pub fn register<F>(&self, condition: TriggerCondition, action: F) -> TriggerGuard<'_>
    where
        F: Fn(&'static str) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, (condition, Arc::new(action)));
        TriggerGuard { registry: self, id }
    }

    // == Execute ==
    /// Runs every action registered for `condition`.
    ///
    /// Actions are collected before running, so an action may register or
    /// drop triggers without deadlocking.
    pub fn execute(&self, condition: TriggerCondition, model: &'static str) {
        let actions: Vec<TriggerAction> = self
            .lock()
            .values()
            .filter(|(registered, _)| *registered == condition)
            .map(|(_, action)| action.clone())
            .collect();

        for action in actions {
            action(model);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, (TriggerCondition, TriggerAction)>> {
        self.triggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("registered", &self.len())
            .finish()
    }
}

// == Trigger Guard ==
/// Keeps a trigger registered. Dropping it removes the trigger.
#[must_use = "the trigger is removed as soon as the guard is dropped"]
pub struct TriggerGuard<'a> {
    registry: &'a TriggerRegistry,
    id: u64,
}

impl Drop for TriggerGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}
