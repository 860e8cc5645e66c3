// Copyright 2024-2025 Irreducible Inc.

use bytemuck::{Pod, Zeroable};

use super::{DeviceUuid, RecordHeader, SymbolId, ViewKind};

/// A kernel execution on a device.
///
/// Timestamps are host nanoseconds. Host-side ones (`append`, `submit`) come from the
/// calling thread; device-side ones (`start`, `end`) are converted from device ticks.
/// The `sycl_*` fields are zero unless the launch came through the SYCL runtime.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct KernelRecord {
    pub header: RecordHeader,
    pub correlation_id: u64,
    /// Unique per kernel invocation, independent of driver enqueue counters.
    pub kernel_id: u64,
    pub queue_id: u64,
    pub context_handle: u64,
    pub device_uuid: DeviceUuid,
    pub process_id: u32,
    pub thread_id: u32,
    pub name: SymbolId,
    pub source_file: SymbolId,
    pub source_line: u32,
    pub api_group: u32,
    pub sycl_node_id: u64,
    pub sycl_invocation_id: u64,
    pub sycl_queue_id: u64,
    pub sycl_task_begin_timestamp: u64,
    pub sycl_enqueue_begin_timestamp: u64,
    pub append_timestamp: u64,
    pub submit_timestamp: u64,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

impl KernelRecord {
    pub fn new() -> Self {
        Self {
            header: RecordHeader::new(ViewKind::Kernel),
            ..Zeroable::zeroed()
        }
    }

    pub fn duration_ns(&self) -> u64 {
        self.end_timestamp.saturating_sub(self.start_timestamp)
    }
}

impl Default for KernelRecord {
    fn default() -> Self {
        Self::new()
    }
}
