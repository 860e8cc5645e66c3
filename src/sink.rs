// Copyright 2024-2025 Irreducible Inc.

use crate::correlation::ExternalId;
use crate::record::{
    ApiCallRecord, DeviceSyncRecord, KernelRecord, MemoryCopyP2pRecord, MemoryCopyRecord,
    MemoryFillRecord, OverheadRecord, SymbolId, ViewKind,
};

/// A finished operation executed on a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceOperation {
    Kernel(KernelRecord),
    MemoryCopy(MemoryCopyRecord),
    MemoryCopyP2p(MemoryCopyP2pRecord),
    MemoryFill(MemoryFillRecord),
}

impl DeviceOperation {
    pub fn kind(&self) -> ViewKind {
        match self {
            DeviceOperation::Kernel(_) => ViewKind::Kernel,
            DeviceOperation::MemoryCopy(_) => ViewKind::MemoryCopy,
            DeviceOperation::MemoryCopyP2p(_) => ViewKind::MemoryCopyP2p,
            DeviceOperation::MemoryFill(_) => ViewKind::MemoryFill,
        }
    }

    pub fn correlation_id(&self) -> u64 {
        match self {
            DeviceOperation::Kernel(r) => r.correlation_id,
            DeviceOperation::MemoryCopy(r) => r.correlation_id,
            DeviceOperation::MemoryCopyP2p(r) => r.correlation_id,
            DeviceOperation::MemoryFill(r) => r.correlation_id,
        }
    }

    pub fn name(&self) -> SymbolId {
        match self {
            DeviceOperation::Kernel(r) => r.name,
            DeviceOperation::MemoryCopy(r) => r.name,
            DeviceOperation::MemoryCopyP2p(r) => r.name,
            DeviceOperation::MemoryFill(r) => r.name,
        }
    }

    pub fn queue_id(&self) -> u64 {
        match self {
            DeviceOperation::Kernel(r) => r.queue_id,
            DeviceOperation::MemoryCopy(r) => r.queue_id,
            DeviceOperation::MemoryCopyP2p(r) => r.queue_id,
            DeviceOperation::MemoryFill(r) => r.queue_id,
        }
    }

    /// Bytes moved or written, zero for kernels.
    pub fn bytes(&self) -> u64 {
        match self {
            DeviceOperation::Kernel(_) => 0,
            DeviceOperation::MemoryCopy(r) => r.bytes,
            DeviceOperation::MemoryCopyP2p(r) => r.bytes,
            DeviceOperation::MemoryFill(r) => r.bytes,
        }
    }

    /// Host timestamps of the operation: append, submit, device start and device end.
    pub fn timestamps(&self) -> [u64; 4] {
        macro_rules! stamps {
            ($r:expr) => {
                [
                    $r.append_timestamp,
                    $r.submit_timestamp,
                    $r.start_timestamp,
                    $r.end_timestamp,
                ]
            };
        }
        match self {
            DeviceOperation::Kernel(r) => stamps!(r),
            DeviceOperation::MemoryCopy(r) => stamps!(r),
            DeviceOperation::MemoryCopyP2p(r) => stamps!(r),
            DeviceOperation::MemoryFill(r) => stamps!(r),
        }
    }
}

/// Consumer of the events produced by the collectors.
///
/// `wants` is asked when an event starts, e.g. when a kernel is appended. Only the sinks
/// interested at that point receive the finished event, so disabling a kind stops new
/// events while those already in flight are still delivered.
pub trait EventSink: Send + Sync {
    fn wants(&self, kind: ViewKind) -> bool;

    /// A fresh correlation id was opened while external ids were pushed on the thread.
    fn on_external_correlation(&self, _correlation_id: u64, _external: &[ExternalId]) {}

    fn on_api_call(&self, _call: &ApiCallRecord) {}

    fn on_device_operation(&self, _operation: &DeviceOperation) {}

    fn on_synchronization(&self, _sync: &DeviceSyncRecord) {}

    fn on_overhead(&self, _overhead: &OverheadRecord) {}
}
