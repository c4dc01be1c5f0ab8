//! Slot registry owned by the broker task.

use std::collections::HashMap;

use tracing::error;

use crate::client::{ClientHandle, ClientId};

/// Dense client registry with O(1) insert and removal.
///
/// Removal swaps the last handle into the vacated slot; the id→slot map
/// keeps every surviving handle addressable after the swap. Only the
/// broker task touches this.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    slots: Vec<ClientHandle>,
    index: HashMap<ClientId, usize>,
}

impl Registry {
    pub(crate) fn insert(&mut self, handle: ClientHandle) {
        let _ = self.index.insert(handle.id(), self.slots.len());
        self.slots.push(handle);
    }

    /// Removes and returns the handle for `id`.
    ///
    /// An unknown id is a broken invariant (every writer deregisters at
    /// most once, and only while registered), so this logs loudly and
    /// keeps the process up instead of panicking.
    pub(crate) fn remove(&mut self, id: ClientId) -> Option<ClientHandle> {
        let Some(slot) = self.index.remove(&id) else {
            error!(
                client = %id,
                registered = self.slots.len(),
                "deregister for unknown client"
            );
            return None;
        };
        let handle = self.slots.swap_remove(slot);
        if let Some(moved) = self.slots.get(slot) {
            let _ = self.index.insert(moved.id(), slot);
        }
        Some(handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ClientHandle> {
        self.slots.iter()
    }

    /// Empties the registry, yielding every handle.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = ClientHandle> {
        self.index.clear();
        self.slots.drain(..)
    }
}
