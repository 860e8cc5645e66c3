// Copyright 2024-2025 Irreducible Inc.

use std::mem::size_of;

use bytemuck::Pod;

use crate::errors::ViewError;
use crate::record::RecordIter;

/// Exclusive handle to a client-supplied byte region and the number of bytes filled so far.
///
/// The buffer is move-only. `Default` is the null buffer, which holds no storage.
#[derive(Debug, Default)]
pub struct ViewBuffer {
    storage: Option<Box<[u8]>>,
    valid_bytes: usize,
}

impl ViewBuffer {
    pub fn new(storage: Box<[u8]>) -> Self {
        Self {
            storage: Some(storage),
            valid_bytes: 0,
        }
    }

    /// Binds new storage, resuming after `valid_bytes` already filled bytes.
    pub fn refresh(&mut self, storage: Box<[u8]>, valid_bytes: usize) -> Result<(), ViewError> {
        if valid_bytes > storage.len() {
            return Err(ViewError::BadArgument(
                "valid bytes exceed the buffer capacity",
            ));
        }

        self.storage = Some(storage);
        self.valid_bytes = valid_bytes;
        Ok(())
    }

    /// Appends a whole record. On failure the buffer is left untouched.
    pub fn insert<T: Pod>(&mut self, record: &T) -> Result<(), ViewError> {
        let available = self.free_bytes();
        let required = size_of::<T>();
        let Some(storage) = self.storage.as_mut() else {
            return Err(ViewError::InsufficientSpace {
                required,
                available,
            });
        };
        if available < required {
            return Err(ViewError::InsufficientSpace {
                required,
                available,
            });
        }

        let start = self.valid_bytes;
        storage[start..start + required].copy_from_slice(bytemuck::bytes_of(record));
        self.valid_bytes += required;
        Ok(())
    }

    /// Whether inserting a `T` right now would fail.
    pub fn buffer_full<T: Pod>(&self) -> bool {
        self.free_bytes() < size_of::<T>()
    }

    pub fn is_null(&self) -> bool {
        self.storage.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.valid_bytes == 0
    }

    pub fn valid_bytes(&self) -> usize {
        self.valid_bytes
    }

    pub fn capacity(&self) -> usize {
        self.storage.as_ref().map_or(0, |s| s.len())
    }

    fn free_bytes(&self) -> usize {
        self.capacity() - self.valid_bytes
    }

    /// The whole bound storage, including bytes past the valid cursor.
    pub fn buffer(&self) -> Option<&[u8]> {
        self.storage.as_deref()
    }

    /// The filled part of the storage.
    pub fn valid(&self) -> &[u8] {
        self.storage
            .as_deref()
            .map_or(&[][..], |s| &s[..self.valid_bytes])
    }

    /// Moves the contents out, leaving a null buffer behind.
    pub fn take(&mut self) -> ViewBuffer {
        std::mem::take(self)
    }

    pub fn into_completed(self) -> Option<CompletedBuffer> {
        self.storage.map(|storage| CompletedBuffer {
            storage,
            valid_bytes: self.valid_bytes,
        })
    }
}

/// A buffer handed back to the client.
#[derive(Debug)]
pub struct CompletedBuffer {
    storage: Box<[u8]>,
    valid_bytes: usize,
}

impl CompletedBuffer {
    pub fn valid_bytes(&self) -> usize {
        self.valid_bytes
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.storage[..self.valid_bytes]
    }

    pub fn records(&self) -> RecordIter<'_> {
        RecordIter::new(self.bytes())
    }

    /// Returns the storage to the client for reuse.
    pub fn into_storage(self) -> Box<[u8]> {
        self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ApiCallRecord, KernelRecord, LARGEST_RECORD_SIZE, ViewKind};

    fn storage(len: usize) -> Box<[u8]> {
        vec![0u8; len].into_boxed_slice()
    }

    #[test]
    fn null_buffer_rejects_inserts() {
        let mut buffer = ViewBuffer::default();
        assert!(buffer.is_null());
        assert!(buffer.buffer_full::<ApiCallRecord>());
        assert!(buffer
            .insert(&ApiCallRecord::new(ViewKind::DriverApiCall))
            .is_err());
        assert!(buffer.into_completed().is_none());
    }

    #[test]
    fn insert_until_full() {
        let record = ApiCallRecord::new(ViewKind::DriverApiCall);
        let size = size_of::<ApiCallRecord>();
        let mut buffer = ViewBuffer::new(storage(size * 3 + size / 2));

        for _ in 0..3 {
            assert!(!buffer.buffer_full::<ApiCallRecord>());
            buffer.insert(&record).unwrap();
        }
        assert!(buffer.buffer_full::<ApiCallRecord>());
        assert_eq!(
            buffer.insert(&record),
            Err(ViewError::InsufficientSpace {
                required: size,
                available: size / 2,
            })
        );
        assert_eq!(buffer.valid_bytes(), size * 3);
    }

    #[test]
    fn take_leaves_null_behind() {
        let mut buffer = ViewBuffer::new(storage(LARGEST_RECORD_SIZE));
        buffer.insert(&KernelRecord::new()).unwrap();

        let moved = buffer.take();
        assert!(buffer.is_null());
        assert_eq!(buffer.valid_bytes(), 0);
        assert_eq!(moved.valid_bytes(), LARGEST_RECORD_SIZE);

        let completed = moved.into_completed().unwrap();
        assert_eq!(completed.records().count(), 1);
        assert_eq!(completed.into_storage().len(), LARGEST_RECORD_SIZE);
    }

    #[test]
    fn refresh_resumes_at_cursor() {
        let mut buffer = ViewBuffer::default();
        assert!(buffer.refresh(storage(16), 17).is_err());

        buffer.refresh(storage(128), 64).unwrap();
        assert_eq!(buffer.valid_bytes(), 64);
        assert_eq!(buffer.valid().len(), 64);
        assert_eq!(buffer.capacity(), 128);
    }
}
