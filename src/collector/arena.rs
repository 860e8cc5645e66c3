// Copyright 2024-2025 Irreducible Inc.

use std::collections::HashMap;

/// Generation-checked reference to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaKey {
    slot: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Bookkeeping for driver objects, addressed by their raw handle.
///
/// Drivers recycle handles: a destroyed event's handle may come back for the next created
/// event. In-flight state therefore keeps an [`ArenaKey`] instead of the handle; removing or
/// renewing an entry bumps the slot generation, and old keys stop resolving.
#[derive(Debug)]
pub struct HandleArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    by_handle: HashMap<u64, ArenaKey>,
}

impl<T> HandleArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_handle: HashMap::new(),
        }
    }

    /// Starts tracking `handle`. A previous entry for the same handle is dropped first.
    pub fn insert(&mut self, handle: u64, value: T) -> ArenaKey {
        self.remove(handle);

        let key = match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.value = Some(value);
                ArenaKey {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                ArenaKey {
                    slot: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.by_handle.insert(handle, key);
        key
    }

    /// Stops tracking `handle` and invalidates all keys to it.
    pub fn remove(&mut self, handle: u64) -> Option<T> {
        let key = self.by_handle.remove(&handle)?;
        let entry = &mut self.slots[key.slot as usize];
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(key.slot);
        entry.value.take()
    }

    /// Keeps the entry for `handle` under a new key; keys issued before stop resolving.
    pub fn renew(&mut self, handle: u64) -> Option<ArenaKey> {
        let value = self.remove(handle)?;
        Some(self.insert(handle, value))
    }

    pub fn key(&self, handle: u64) -> Option<ArenaKey> {
        self.by_handle.get(&handle).copied()
    }

    pub fn get(&self, key: ArenaKey) -> Option<&T> {
        self.slots
            .get(key.slot as usize)
            .filter(|entry| entry.generation == key.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, key: ArenaKey) -> Option<&mut T> {
        self.slots
            .get_mut(key.slot as usize)
            .filter(|entry| entry.generation == key.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    pub fn get_by_handle(&self, handle: u64) -> Option<&T> {
        self.get(self.key(handle)?)
    }

    pub fn get_by_handle_mut(&mut self, handle: u64) -> Option<&mut T> {
        let key = self.key(handle)?;
        self.get_mut(key)
    }

    pub fn contains(&self, key: ArenaKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = u64> + '_ {
        self.by_handle.keys().copied()
    }
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
