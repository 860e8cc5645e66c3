// Copyright 2024-2025 Irreducible Inc.

use thiserror::Error;

use crate::correlation::ExternalKind;
use crate::record::ViewKind;

// use this instead of tracing::error! for internal failures that must not go unnoticed
macro_rules! err_msg {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        assert!(cfg!(not(feature = "panic")))
    }};
}

pub(crate) use err_msg;

/// Failure reported by a vendor runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{api} failed with code {code}")]
pub struct DriverError {
    pub api: &'static str,
    pub code: i32,
}

impl DriverError {
    pub fn new(api: &'static str, code: i32) -> Self {
        Self { api, code }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("bad argument: {0}")]
    BadArgument(&'static str),
    #[error("buffer callbacks are not set")]
    NoCallbacksSet,
    #[error("view kind {0:?} is not implemented by the attached collectors")]
    NotImplemented(ViewKind),
    #[error("external correlation stack for {0:?} is empty")]
    ExternalIdQueueEmpty(ExternalKind),
    #[error("record of {required} bytes does not fit into {available} free bytes")]
    InsufficientSpace { required: usize, available: usize },
    #[error("record at offset {offset} needs {required} bytes, {remaining} left")]
    TruncatedRecord {
        offset: usize,
        required: usize,
        remaining: usize,
    },
    #[error("record at offset {offset} has invalid kind {kind}")]
    CorruptRecord { offset: usize, kind: u32 },
    #[error("flush requested from within the buffer completed callback")]
    CallbackReentrancy,
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Result codes of the C-shaped surface.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success = 0,
    EndOfBuffer = 1,
    NotImplemented = 2,
    BadArgument = 3,
    NoCallbacksSet = 4,
    ExternalIdQueueEmpty = 5,
    CorruptedBuffer = 6,
    Error = 7,
}

impl Status {
    pub fn from_result<T>(result: &Result<T, ViewError>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => e.into(),
        }
    }

    /// Status of a [`get_next_record`](crate::record::get_next_record) call: the end of the
    /// buffer is reported as [`Status::EndOfBuffer`].
    pub fn from_next_record<T>(result: &Result<Option<T>, ViewError>) -> Self {
        match result {
            Ok(Some(_)) => Status::Success,
            Ok(None) => Status::EndOfBuffer,
            Err(e) => e.into(),
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl From<&ViewError> for Status {
    fn from(value: &ViewError) -> Self {
        match value {
            ViewError::BadArgument(_) => Status::BadArgument,
            ViewError::NoCallbacksSet => Status::NoCallbacksSet,
            ViewError::NotImplemented(_) => Status::NotImplemented,
            ViewError::ExternalIdQueueEmpty(_) => Status::ExternalIdQueueEmpty,
            ViewError::TruncatedRecord { .. } | ViewError::CorruptRecord { .. } => {
                Status::CorruptedBuffer
            }
            ViewError::InsufficientSpace { .. }
            | ViewError::CallbackReentrancy
            | ViewError::Driver(_) => Status::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let ok: Result<(), ViewError> = Ok(());
        assert_eq!(Status::from_result(&ok), Status::Success);

        let empty: Result<u64, _> = Err(ViewError::ExternalIdQueueEmpty(ExternalKind::Custom0));
        assert_eq!(Status::from_result(&empty), Status::ExternalIdQueueEmpty);

        let driver: Result<(), _> = Err(ViewError::from(DriverError::new("zeEventQueryKernelTimestamp", -1)));
        assert_eq!(Status::from_result(&driver), Status::Error);

        let truncated = ViewError::TruncatedRecord {
            offset: 8,
            required: 64,
            remaining: 12,
        };
        assert_eq!(Status::from(&truncated), Status::CorruptedBuffer);
    }

    #[test]
    fn end_of_buffer_status() {
        use crate::record::{get_next_record, KernelRecord};

        let record = KernelRecord::new();
        let bytes = bytemuck::bytes_of(&record);
        let first = get_next_record(bytes, None);
        assert_eq!(Status::from_next_record(&first), Status::Success);

        let next = get_next_record(bytes, first.unwrap());
        assert_eq!(Status::from_next_record(&next), Status::EndOfBuffer);
        assert_eq!(
            Status::from_next_record(&get_next_record(&[], None)),
            Status::EndOfBuffer
        );

        assert_eq!(
            Status::from_next_record(&get_next_record(&bytes[..4], None)),
            Status::CorruptedBuffer
        );
    }
}
