// Copyright 2024-2025 Irreducible Inc.

use bytemuck::{Pod, Zeroable};

use super::{DeviceUuid, RecordHeader, ViewKind};
use crate::correlation::ExternalKind;

/// Links a correlation id to the external id that was on top of the stack when
/// the correlated call was made.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ExternalCorrelationRecord {
    pub header: RecordHeader,
    pub correlation_id: u64,
    pub external_id: u64,
    pub external_kind: u32,
    pub reserved: u32,
}

impl ExternalCorrelationRecord {
    pub fn new(correlation_id: u64, kind: ExternalKind, external_id: u64) -> Self {
        Self {
            header: RecordHeader::new(ViewKind::ExternalCorrelation),
            correlation_id,
            external_id,
            external_kind: kind as u32,
            reserved: 0,
        }
    }

    pub fn external(&self) -> ExternalKind {
        ExternalKind::from_raw(self.external_kind).unwrap_or(ExternalKind::Invalid)
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverheadKind {
    Invalid = 0,
    /// Time spent in collector bookkeeping.
    Time = 1,
}

/// Time the collectors themselves spent inside an intercepted call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct OverheadRecord {
    pub header: RecordHeader,
    pub process_id: u32,
    pub thread_id: u32,
    pub overhead_kind: u32,
    pub api_group: u32,
    pub api_id: u32,
    pub reserved: u32,
    pub count: u64,
    pub duration_ns: u64,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

impl OverheadRecord {
    pub fn new() -> Self {
        Self {
            header: RecordHeader::new(ViewKind::CollectionOverhead),
            overhead_kind: OverheadKind::Time as u32,
            ..Zeroable::zeroed()
        }
    }
}

impl Default for OverheadRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncType {
    Invalid = 0,
    GpuBarrier = 1,
    HostEvent = 2,
    HostFence = 3,
    HostCommandList = 4,
    HostCommandQueue = 5,
    RuntimeQueue = 6,
}

impl SyncType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => SyncType::GpuBarrier,
            2 => SyncType::HostEvent,
            3 => SyncType::HostFence,
            4 => SyncType::HostCommandList,
            5 => SyncType::HostCommandQueue,
            6 => SyncType::RuntimeQueue,
            _ => SyncType::Invalid,
        }
    }
}

/// A host thread waiting on device progress.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DeviceSyncRecord {
    pub header: RecordHeader,
    pub correlation_id: u64,
    pub process_id: u32,
    pub thread_id: u32,
    pub sync_type: u32,
    pub api_group: u32,
    pub api_id: u32,
    pub return_code: i32,
    pub event_handle: u64,
    pub queue_handle: u64,
    pub context_handle: u64,
    pub device_uuid: DeviceUuid,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

impl DeviceSyncRecord {
    pub fn new(sync_type: SyncType) -> Self {
        Self {
            header: RecordHeader::new(ViewKind::DeviceSynchronization),
            sync_type: sync_type as u32,
            ..Zeroable::zeroed()
        }
    }

    pub fn sync_type(&self) -> SyncType {
        SyncType::from_raw(self.sync_type)
    }
}
