use std::collections::HashMap;

use super::error::{StreamError, StreamResult};
use super::manager::StreamManager;
use super::stream_slot::{StreamSlot, INVALID_STREAM_SLOT};

/// Stable reference to a manager in a [`ManagerTable`].
///
/// A handle stops resolving once its manager was removed, even if the entry got reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerHandle {
    index: usize,
    generation: u64,
}

struct Entry {
    generation: u64,
    manager: Option<Box<dyn StreamManager>>,
}

/// Per-actor table of stream managers and the slots bound to them.
#[derive(Default)]
pub struct ManagerTable {
    entries: Vec<Entry>,
    free: Vec<usize>,
    slots: HashMap<StreamSlot, ManagerHandle>,
    next_slot: StreamSlot,
}

impl ManagerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, manager: Box<dyn StreamManager>) -> ManagerHandle {
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.manager = Some(manager);
                ManagerHandle {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    manager: Some(manager),
                });
                ManagerHandle {
                    index: self.entries.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    pub fn get(&self, handle: ManagerHandle) -> Option<&dyn StreamManager> {
        self.entries
            .get(handle.index)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.manager.as_deref())
    }

    pub fn get_mut(&mut self, handle: ManagerHandle) -> Option<&mut Box<dyn StreamManager>> {
        self.entries
            .get_mut(handle.index)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.manager.as_mut())
    }

    /// Removes a manager and releases every slot bound to it.
    pub fn remove(&mut self, handle: ManagerHandle) -> Option<Box<dyn StreamManager>> {
        let entry = self
            .entries
            .get_mut(handle.index)
            .filter(|e| e.generation == handle.generation)?;
        let manager = entry.manager.take()?;
        entry.generation += 1;
        self.free.push(handle.index);
        self.slots.retain(|_, h| *h != handle);
        Some(manager)
    }

    /// Reserves a fresh slot. Never returns the invalid slot or one still in use.
    pub fn alloc_slot(&mut self) -> StreamResult<StreamSlot> {
        for _ in 0..=StreamSlot::MAX {
            self.next_slot = self.next_slot.wrapping_add(1);
            if self.next_slot != INVALID_STREAM_SLOT && !self.slots.contains_key(&self.next_slot) {
                return Ok(self.next_slot);
            }
        }
        Err(StreamError::InvalidStreamState {
            reason: "no free stream slot".to_string(),
        })
    }

    pub fn bind(&mut self, slot: StreamSlot, handle: ManagerHandle) {
        self.slots.insert(slot, handle);
    }

    pub fn unbind(&mut self, slot: StreamSlot) {
        self.slots.remove(&slot);
    }

    /// Slots currently bound to `handle`.
    pub fn bound_slots(&self, handle: ManagerHandle) -> Vec<StreamSlot> {
        self.slots
            .iter()
            .filter(|(_, h)| **h == handle)
            .map(|(slot, _)| *slot)
            .collect()
    }

    /// Manager owning `slot`, if it is still alive.
    pub fn lookup(&self, slot: StreamSlot) -> Option<ManagerHandle> {
        self.slots
            .get(&slot)
            .copied()
            .filter(|h| self.get(*h).is_some())
    }

    pub fn handles(&self) -> Vec<ManagerHandle> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.manager.is_some())
            .map(|(index, e)| ManagerHandle {
                index,
                generation: e.generation,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.manager.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
