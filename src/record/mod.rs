// Copyright 2024-2025 Irreducible Inc.

//! Fixed-layout view records.
//!
//! Every record is a `#[repr(C)]` [`Pod`] struct whose first field is a
//! [`RecordHeader`]; the header's `kind` selects the layout, which lets a buffer
//! be walked without any side metadata.

mod api;
mod kernel;
mod memory;
mod meta;

use std::fmt;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

pub use api::{api_name, ApiCallRecord, ApiGroup};
pub use kernel::KernelRecord;
pub use memory::{
    MemcpyType, MemoryCopyP2pRecord, MemoryCopyRecord, MemoryFillRecord, MemoryType,
};
pub use meta::{DeviceSyncRecord, ExternalCorrelationRecord, OverheadKind, OverheadRecord, SyncType};

use crate::errors::ViewError;

/// Discriminant stored at offset 0 of every record.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewKind {
    Invalid = 0,
    Kernel = 1,
    MemoryCopy = 2,
    MemoryCopyP2p = 3,
    MemoryFill = 4,
    RuntimeApiCall = 5,
    DriverApiCall = 6,
    ExternalCorrelation = 7,
    CollectionOverhead = 8,
    DeviceSynchronization = 9,
}

impl ViewKind {
    pub const ALL: [ViewKind; 9] = [
        ViewKind::Kernel,
        ViewKind::MemoryCopy,
        ViewKind::MemoryCopyP2p,
        ViewKind::MemoryFill,
        ViewKind::RuntimeApiCall,
        ViewKind::DriverApiCall,
        ViewKind::ExternalCorrelation,
        ViewKind::CollectionOverhead,
        ViewKind::DeviceSynchronization,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ViewKind::Invalid),
            1 => Some(ViewKind::Kernel),
            2 => Some(ViewKind::MemoryCopy),
            3 => Some(ViewKind::MemoryCopyP2p),
            4 => Some(ViewKind::MemoryFill),
            5 => Some(ViewKind::RuntimeApiCall),
            6 => Some(ViewKind::DriverApiCall),
            7 => Some(ViewKind::ExternalCorrelation),
            8 => Some(ViewKind::CollectionOverhead),
            9 => Some(ViewKind::DeviceSynchronization),
            _ => None,
        }
    }

    /// Size in bytes of the record layout for this kind, 0 for `Invalid`.
    pub const fn record_size(self) -> usize {
        match self {
            ViewKind::Invalid => 0,
            ViewKind::Kernel => size_of::<KernelRecord>(),
            ViewKind::MemoryCopy => size_of::<MemoryCopyRecord>(),
            ViewKind::MemoryCopyP2p => size_of::<MemoryCopyP2pRecord>(),
            ViewKind::MemoryFill => size_of::<MemoryFillRecord>(),
            ViewKind::RuntimeApiCall | ViewKind::DriverApiCall => size_of::<ApiCallRecord>(),
            ViewKind::ExternalCorrelation => size_of::<ExternalCorrelationRecord>(),
            ViewKind::CollectionOverhead => size_of::<OverheadRecord>(),
            ViewKind::DeviceSynchronization => size_of::<DeviceSyncRecord>(),
        }
    }

    const fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// The largest fixed record size; client buffers must hold at least one such record.
pub const LARGEST_RECORD_SIZE: usize = {
    let mut largest = 0;
    let mut i = 0;
    while i < ViewKind::ALL.len() {
        largest = max(largest, ViewKind::ALL[i].record_size());
        i += 1;
    }
    largest
};

/// A set of view kinds.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ViewKindSet(u32);

impl ViewKindSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, kind: ViewKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub const fn union(self, other: ViewKindSet) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, kind: ViewKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: ViewKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: ViewKind) {
        self.0 &= !kind.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn iter(self) -> impl Iterator<Item = ViewKind> {
        ViewKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

impl fmt::Debug for ViewKindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Leading field of every record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RecordHeader {
    pub kind: u32,
    pub reserved: u32,
}

impl RecordHeader {
    pub const fn new(kind: ViewKind) -> Self {
        Self {
            kind: kind as u32,
            reserved: 0,
        }
    }

    pub fn kind(&self) -> ViewKind {
        ViewKind::from_raw(self.kind).unwrap_or(ViewKind::Invalid)
    }
}

/// Interned string, resolved through [`SymbolTable`](crate::SymbolTable). `SymbolId::NONE` means absent.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct SymbolId(pub u64);

impl SymbolId {
    pub const NONE: SymbolId = SymbolId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Device identifier as reported by the driver.
pub type DeviceUuid = [u8; 16];

/// Implemented by every fixed-layout record type.
pub trait ViewRecord: Pod {
    fn header(&self) -> &RecordHeader;

    fn kind(&self) -> ViewKind {
        self.header().kind()
    }
}

macro_rules! impl_view_record {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ViewRecord for $ty {
                fn header(&self) -> &RecordHeader {
                    &self.header
                }
            }
        )*
    };
}

impl_view_record!(
    KernelRecord,
    MemoryCopyRecord,
    MemoryCopyP2pRecord,
    MemoryFillRecord,
    ApiCallRecord,
    ExternalCorrelationRecord,
    OverheadRecord,
    DeviceSyncRecord,
);

/// A decoded record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Record {
    Kernel(KernelRecord),
    MemoryCopy(MemoryCopyRecord),
    MemoryCopyP2p(MemoryCopyP2pRecord),
    MemoryFill(MemoryFillRecord),
    RuntimeApiCall(ApiCallRecord),
    DriverApiCall(ApiCallRecord),
    ExternalCorrelation(ExternalCorrelationRecord),
    CollectionOverhead(OverheadRecord),
    DeviceSynchronization(DeviceSyncRecord),
}

impl Record {
    pub fn kind(&self) -> ViewKind {
        match self {
            Record::Kernel(_) => ViewKind::Kernel,
            Record::MemoryCopy(_) => ViewKind::MemoryCopy,
            Record::MemoryCopyP2p(_) => ViewKind::MemoryCopyP2p,
            Record::MemoryFill(_) => ViewKind::MemoryFill,
            Record::RuntimeApiCall(_) => ViewKind::RuntimeApiCall,
            Record::DriverApiCall(_) => ViewKind::DriverApiCall,
            Record::ExternalCorrelation(_) => ViewKind::ExternalCorrelation,
            Record::CollectionOverhead(_) => ViewKind::CollectionOverhead,
            Record::DeviceSynchronization(_) => ViewKind::DeviceSynchronization,
        }
    }

    /// Correlation id of the record, if the kind carries one.
    pub fn correlation_id(&self) -> Option<u64> {
        match self {
            Record::Kernel(r) => Some(r.correlation_id),
            Record::MemoryCopy(r) => Some(r.correlation_id),
            Record::MemoryCopyP2p(r) => Some(r.correlation_id),
            Record::MemoryFill(r) => Some(r.correlation_id),
            Record::RuntimeApiCall(r) | Record::DriverApiCall(r) => Some(r.correlation_id),
            Record::ExternalCorrelation(r) => Some(r.correlation_id),
            Record::DeviceSynchronization(r) => Some(r.correlation_id),
            Record::CollectionOverhead(_) => None,
        }
    }

    fn decode(kind: ViewKind, bytes: &[u8]) -> Self {
        match kind {
            ViewKind::Kernel => Record::Kernel(bytemuck::pod_read_unaligned(bytes)),
            ViewKind::MemoryCopy => Record::MemoryCopy(bytemuck::pod_read_unaligned(bytes)),
            ViewKind::MemoryCopyP2p => Record::MemoryCopyP2p(bytemuck::pod_read_unaligned(bytes)),
            ViewKind::MemoryFill => Record::MemoryFill(bytemuck::pod_read_unaligned(bytes)),
            ViewKind::RuntimeApiCall => Record::RuntimeApiCall(bytemuck::pod_read_unaligned(bytes)),
            ViewKind::DriverApiCall => Record::DriverApiCall(bytemuck::pod_read_unaligned(bytes)),
            ViewKind::ExternalCorrelation => {
                Record::ExternalCorrelation(bytemuck::pod_read_unaligned(bytes))
            }
            ViewKind::CollectionOverhead => {
                Record::CollectionOverhead(bytemuck::pod_read_unaligned(bytes))
            }
            ViewKind::DeviceSynchronization => {
                Record::DeviceSynchronization(bytemuck::pod_read_unaligned(bytes))
            }
            ViewKind::Invalid => unreachable!("invalid records are rejected before decoding"),
        }
    }
}

/// Position of one validated record inside a buffer.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a> {
    offset: usize,
    kind: ViewKind,
    bytes: &'a [u8],
}

impl<'a> RecordRef<'a> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn decode(&self) -> Record {
        Record::decode(self.kind, self.bytes)
    }

    /// Reads the record as `T` if its size matches.
    pub fn read<T: ViewRecord>(&self) -> Option<T> {
        (self.bytes.len() == size_of::<T>()).then(|| bytemuck::pod_read_unaligned(self.bytes))
    }
}

fn record_at(buffer: &[u8], offset: usize) -> Result<RecordRef<'_>, ViewError> {
    let remaining = buffer.len() - offset;
    if remaining < size_of::<RecordHeader>() {
        return Err(ViewError::TruncatedRecord {
            offset,
            required: size_of::<RecordHeader>(),
            remaining,
        });
    }

    let header: RecordHeader =
        bytemuck::pod_read_unaligned(&buffer[offset..offset + size_of::<RecordHeader>()]);
    let kind = match ViewKind::from_raw(header.kind) {
        Some(ViewKind::Invalid) | None => {
            return Err(ViewError::CorruptRecord {
                offset,
                kind: header.kind,
            })
        }
        Some(kind) => kind,
    };

    let required = kind.record_size();
    if remaining < required {
        return Err(ViewError::TruncatedRecord {
            offset,
            required,
            remaining,
        });
    }

    Ok(RecordRef {
        offset,
        kind,
        bytes: &buffer[offset..offset + required],
    })
}

/// Advances over the valid bytes of a completed buffer.
///
/// `current == None` yields the first record. `Ok(None)` signals the end of the buffer.
/// The call has no hidden state: passing the same `current` twice yields the same record.
pub fn get_next_record<'a>(
    buffer: &'a [u8],
    current: Option<RecordRef<'a>>,
) -> Result<Option<RecordRef<'a>>, ViewError> {
    let offset = match current {
        None => 0,
        Some(current) => current.offset + current.bytes.len(),
    };

    if offset >= buffer.len() {
        return Ok(None);
    }

    record_at(buffer, offset).map(Some)
}

/// Iterator over the records of a buffer. Stops after the first error.
pub struct RecordIter<'a> {
    buffer: &'a [u8],
    current: Option<RecordRef<'a>>,
    done: bool,
}

impl<'a> RecordIter<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            current: None,
            done: false,
        }
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<Record, ViewError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match get_next_record(self.buffer, self.current) {
            Ok(Some(record)) => {
                self.current = Some(record);
                Some(Ok(record.decode()))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
