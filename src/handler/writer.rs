// Copyright 2024-2025 Irreducible Inc.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};

use crate::buffer::ViewBuffer;
use crate::errors::ViewError;
use crate::record::{ViewRecord, LARGEST_RECORD_SIZE};

type Slot = Arc<Mutex<ViewBuffer>>;

fn lock(slot: &Slot) -> MutexGuard<'_, ViewBuffer> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// The buffers records are currently written into, one per producing thread.
///
/// Slots are never removed: a writer may still hold a slot it looked up while a flush
/// runs, and a removed slot would hide its records from every later flush.
#[derive(Default)]
pub(crate) struct RecordWriter {
    buffers: RwLock<HashMap<ThreadId, Slot>>,
}

impl RecordWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn thread_buffer(&self) -> Slot {
        let id = thread::current().id();
        if let Some(slot) = self
            .buffers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
        {
            return slot.clone();
        }

        self.buffers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id)
            .or_default()
            .clone()
    }

    /// Appends `record` to the calling thread's buffer.
    ///
    /// When the record does not fit, fresh storage is taken from `request` and the filled
    /// buffer goes to `rotate`. Storage smaller than [`LARGEST_RECORD_SIZE`] is rejected.
    pub(crate) fn write<T: ViewRecord>(
        &self,
        record: &T,
        request: impl FnOnce() -> Result<Box<[u8]>, ViewError>,
        rotate: impl FnOnce(ViewBuffer),
    ) -> Result<(), ViewError> {
        let slot = self.thread_buffer();
        let mut buffer = lock(&slot);
        if !buffer.buffer_full::<T>() {
            return buffer.insert(record);
        }

        let storage = request()?;
        if storage.len() < LARGEST_RECORD_SIZE {
            tracing::warn!(
                capacity = storage.len(),
                required = LARGEST_RECORD_SIZE,
                "requested buffer is too small"
            );
            return Err(ViewError::BadArgument(
                "requested buffer is smaller than the largest record",
            ));
        }

        let full = std::mem::replace(&mut *buffer, ViewBuffer::new(storage));
        let result = buffer.insert(record);
        drop(buffer);

        if !full.is_null() {
            rotate(full);
        }
        result
    }

    /// Hands every non-empty buffer to `f`. Emptied slots request new storage on their
    /// next write.
    pub(crate) fn drain(&self, mut f: impl FnMut(ViewBuffer)) {
        let slots: Vec<Slot> = self
            .buffers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for slot in slots {
            let buffer = {
                let mut buffer = lock(&slot);
                if buffer.is_empty() {
                    continue;
                }
                buffer.take()
            };
            f(buffer);
        }
    }

    /// Number of threads that have written at least once.
    pub(crate) fn threads(&self) -> usize {
        self.buffers.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
