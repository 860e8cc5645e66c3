// Copyright 2024-2025 Irreducible Inc.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::{DeviceUuid, RecordHeader, SymbolId, ViewKind};

/// Kind of allocation a pointer refers to.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    /// Not a known allocation, e.g. pageable host memory.
    #[default]
    Memory = 0,
    Host = 1,
    Device = 2,
    Shared = 3,
}

impl MemoryType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => MemoryType::Host,
            2 => MemoryType::Device,
            3 => MemoryType::Shared,
            _ => MemoryType::Memory,
        }
    }

    pub fn letter(self) -> char {
        match self {
            MemoryType::Memory => 'M',
            MemoryType::Host => 'H',
            MemoryType::Device => 'D',
            MemoryType::Shared => 'S',
        }
    }
}

/// Direction of a copy, encoded from its source and destination memory types.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct MemcpyType(pub u32);

impl MemcpyType {
    pub fn new(src: MemoryType, dst: MemoryType) -> Self {
        Self(src as u32 * 4 + dst as u32)
    }

    pub fn src(self) -> MemoryType {
        MemoryType::from_raw(self.0 / 4)
    }

    pub fn dst(self) -> MemoryType {
        MemoryType::from_raw(self.0 % 4)
    }
}

impl fmt::Display for MemcpyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}2{}", self.src().letter(), self.dst().letter())
    }
}

impl fmt::Debug for MemcpyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemcpyType({self})")
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MemoryCopyRecord {
    pub header: RecordHeader,
    pub correlation_id: u64,
    pub memcpy_id: u64,
    pub queue_id: u64,
    pub context_handle: u64,
    pub device_uuid: DeviceUuid,
    pub process_id: u32,
    pub thread_id: u32,
    pub name: SymbolId,
    pub memcpy_type: MemcpyType,
    pub src_memory: u32,
    pub dst_memory: u32,
    pub api_group: u32,
    pub bytes: u64,
    pub append_timestamp: u64,
    pub submit_timestamp: u64,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

impl MemoryCopyRecord {
    pub fn new() -> Self {
        Self {
            header: RecordHeader::new(ViewKind::MemoryCopy),
            ..Zeroable::zeroed()
        }
    }
}

impl Default for MemoryCopyRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// A copy between two different devices.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MemoryCopyP2pRecord {
    pub header: RecordHeader,
    pub correlation_id: u64,
    pub memcpy_id: u64,
    pub queue_id: u64,
    pub context_handle: u64,
    pub src_device_uuid: DeviceUuid,
    pub dst_device_uuid: DeviceUuid,
    pub process_id: u32,
    pub thread_id: u32,
    pub name: SymbolId,
    pub memcpy_type: MemcpyType,
    pub src_memory: u32,
    pub dst_memory: u32,
    pub api_group: u32,
    pub bytes: u64,
    pub append_timestamp: u64,
    pub submit_timestamp: u64,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

impl MemoryCopyP2pRecord {
    pub fn new() -> Self {
        Self {
            header: RecordHeader::new(ViewKind::MemoryCopyP2p),
            ..Zeroable::zeroed()
        }
    }
}

impl Default for MemoryCopyP2pRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MemoryFillRecord {
    pub header: RecordHeader,
    pub correlation_id: u64,
    pub fill_id: u64,
    pub queue_id: u64,
    pub context_handle: u64,
    pub device_uuid: DeviceUuid,
    pub process_id: u32,
    pub thread_id: u32,
    pub name: SymbolId,
    pub memory_type: u32,
    pub api_group: u32,
    pub bytes: u64,
    pub value_for_set: u64,
    pub pattern_size: u64,
    pub append_timestamp: u64,
    pub submit_timestamp: u64,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

impl MemoryFillRecord {
    pub fn new() -> Self {
        Self {
            header: RecordHeader::new(ViewKind::MemoryFill),
            ..Zeroable::zeroed()
        }
    }
}

impl Default for MemoryFillRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memcpy_type_encodes_direction() {
        let h2d = MemcpyType::new(MemoryType::Host, MemoryType::Device);
        assert_eq!(h2d.src(), MemoryType::Host);
        assert_eq!(h2d.dst(), MemoryType::Device);
        assert_eq!(h2d.to_string(), "H2D");
        assert_eq!(
            MemcpyType::new(MemoryType::Shared, MemoryType::Memory).to_string(),
            "S2M"
        );
    }
}
