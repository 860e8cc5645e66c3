// Copyright 2024-2025 Irreducible Inc.

use bytemuck::{Pod, Zeroable};

use super::{RecordHeader, ViewKind};

/// Runtime or driver family an API id belongs to.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiGroup {
    Invalid = 0,
    LevelZero = 1,
    OpenCl = 2,
    Sycl = 3,
}

impl ApiGroup {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => ApiGroup::LevelZero,
            2 => ApiGroup::OpenCl,
            3 => ApiGroup::Sycl,
            _ => ApiGroup::Invalid,
        }
    }
}

/// A runtime (`RuntimeApiCall`) or driver (`DriverApiCall`) function call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ApiCallRecord {
    pub header: RecordHeader,
    pub correlation_id: u64,
    pub process_id: u32,
    pub thread_id: u32,
    pub api_group: u32,
    pub api_id: u32,
    pub return_code: i32,
    pub reserved: u32,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

impl ApiCallRecord {
    pub fn new(kind: ViewKind) -> Self {
        debug_assert!(matches!(
            kind,
            ViewKind::RuntimeApiCall | ViewKind::DriverApiCall
        ));
        Self {
            header: RecordHeader::new(kind),
            ..Zeroable::zeroed()
        }
    }

    pub fn group(&self) -> ApiGroup {
        ApiGroup::from_raw(self.api_group)
    }

    pub fn name(&self) -> Option<&'static str> {
        api_name(self.group(), self.api_id)
    }
}

/// Function name for an API id of the given group.
pub fn api_name(group: ApiGroup, api_id: u32) -> Option<&'static str> {
    match group {
        #[cfg(feature = "level_zero")]
        ApiGroup::LevelZero => crate::collector::LevelZeroApi::from_id(api_id).map(|api| api.name()),
        #[cfg(feature = "opencl")]
        ApiGroup::OpenCl => crate::collector::OpenClApi::from_id(api_id).map(|api| api.name()),
        #[cfg(feature = "sycl")]
        ApiGroup::Sycl => crate::collector::SyclApi::from_id(api_id).map(|api| api.name()),
        _ => {
            let _ = api_id;
            None
        }
    }
}
