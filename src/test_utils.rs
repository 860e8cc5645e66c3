// Copyright 2024-2025 Irreducible Inc.

//! In-process stand-ins for vendor runtimes and clients, used by the tests.
//!
//! The mock drivers complete every operation as soon as it is queried, unless the event
//! is held. Completion timestamps come from the host clock, so a
//! [`DeviceTimer::host_aligned(0)`](crate::clock::DeviceTimer::host_aligned) maps them 1:1.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::host_timestamp;
use crate::correlation::ExternalId;
use crate::errors::{DriverError, ViewError};
use crate::handler::ViewHandler;
use crate::record::{
    ApiCallRecord, DeviceSyncRecord, KernelRecord, OverheadRecord, Record, ViewKind,
    ViewKindSet,
};
use crate::sink::{DeviceOperation, EventSink};

/// Simulated device execution time.
pub const MOCK_DURATION_NS: u64 = 1_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct MockState {
    held: HashSet<u64>,
    fail_next: Option<i32>,
    next_event: u64,
    tracing_enabled: usize,
    created: Vec<u64>,
    reset: Vec<u64>,
    destroyed: Vec<u64>,
    retained: Vec<u64>,
    released: Vec<u64>,
}

impl MockState {
    /// `Ok(None)` for held events, the injected failure if there is one.
    fn query(&mut self, api: &'static str, event: u64) -> Result<Option<u64>, DriverError> {
        if let Some(code) = self.fail_next.take() {
            return Err(DriverError::new(api, code));
        }
        if self.held.contains(&event) {
            return Ok(None);
        }
        Ok(Some(host_timestamp()))
    }
}

macro_rules! mock_controls {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            fn state(&self) -> MutexGuard<'_, MockState> {
                lock(&self.state)
            }

            /// Keeps the operation behind `event` running until released.
            pub fn hold(&self, event: u64) {
                self.state().held.insert(event);
            }

            pub fn release_hold(&self, event: u64) {
                self.state().held.remove(&event);
            }

            /// Fails the next completion query with `code`.
            pub fn fail_next_query(&self, code: i32) {
                self.state().fail_next = Some(code);
            }

            /// How often tracing was installed.
            pub fn tracing_enabled(&self) -> usize {
                self.state().tracing_enabled
            }
        }
    };
}

/// Level Zero driver backed by the host clock.
#[cfg(feature = "level_zero")]
#[derive(Debug, Default)]
pub struct MockLevelZeroDriver {
    state: Mutex<MockState>,
}

#[cfg(feature = "level_zero")]
mock_controls!(MockLevelZeroDriver);

#[cfg(feature = "level_zero")]
impl MockLevelZeroDriver {
    /// Events the collector created for operations appended without one.
    pub fn created_events(&self) -> Vec<u64> {
        self.state().created.clone()
    }

    pub fn reset_events(&self) -> Vec<u64> {
        self.state().reset.clone()
    }

    pub fn destroyed_events(&self) -> Vec<u64> {
        self.state().destroyed.clone()
    }
}

#[cfg(feature = "level_zero")]
impl crate::collector::LevelZeroDriver for MockLevelZeroDriver {
    fn enable_tracing(&self) -> Result<(), DriverError> {
        self.state().tracing_enabled += 1;
        Ok(())
    }

    fn query_kernel_timestamp(
        &self,
        event: u64,
    ) -> Result<Option<crate::collector::level_zero::KernelTimestamps>, DriverError> {
        let start = self
            .state()
            .query("zeEventQueryKernelTimestamp", event)?;
        Ok(start.map(|start| crate::collector::level_zero::KernelTimestamps {
            start,
            end: start + MOCK_DURATION_NS,
        }))
    }

    fn create_timestamp_event(&self, _context: u64) -> Result<u64, DriverError> {
        let mut state = self.state();
        state.next_event += 1;
        let event = 0xe000_0000 + state.next_event;
        state.created.push(event);
        Ok(event)
    }

    fn reset_event(&self, event: u64) -> Result<(), DriverError> {
        self.state().reset.push(event);
        Ok(())
    }

    fn destroy_event(&self, event: u64) -> Result<(), DriverError> {
        self.state().destroyed.push(event);
        Ok(())
    }
}

/// OpenCL driver backed by the host clock.
#[cfg(feature = "opencl")]
#[derive(Debug, Default)]
pub struct MockOpenClDriver {
    state: Mutex<MockState>,
}

#[cfg(feature = "opencl")]
mock_controls!(MockOpenClDriver);

#[cfg(feature = "opencl")]
impl MockOpenClDriver {
    pub fn retained(&self) -> Vec<u64> {
        self.state().retained.clone()
    }

    pub fn released(&self) -> Vec<u64> {
        self.state().released.clone()
    }
}

#[cfg(feature = "opencl")]
impl crate::collector::OpenClDriver for MockOpenClDriver {
    fn enable_tracing(&self) -> Result<(), DriverError> {
        self.state().tracing_enabled += 1;
        Ok(())
    }

    fn profiling_info(
        &self,
        event: u64,
    ) -> Result<Option<crate::collector::opencl::ProfilingInfo>, DriverError> {
        let now = self.state().query("clGetEventProfilingInfo", event)?;
        Ok(now.map(|now| crate::collector::opencl::ProfilingInfo {
            queued: now,
            submit: now,
            start: now,
            end: now + MOCK_DURATION_NS,
        }))
    }

    fn retain_event(&self, event: u64) -> Result<(), DriverError> {
        self.state().retained.push(event);
        Ok(())
    }

    fn release_event(&self, event: u64) -> Result<(), DriverError> {
        self.state().released.push(event);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    External(u64, Vec<ExternalId>),
    ApiCall(ApiCallRecord),
    Device(DeviceOperation),
    Sync(DeviceSyncRecord),
    Overhead(OverheadRecord),
}

/// Sink that keeps every event it is given, in arrival order.
#[derive(Debug)]
pub struct RecordingSink {
    kinds: ViewKindSet,
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new(kinds: ViewKindSet) -> Self {
        Self {
            kinds,
            events: Mutex::default(),
        }
    }

    pub fn all() -> Self {
        Self::new(ViewKind::ALL.iter().fold(ViewKindSet::empty(), |s, &k| s.with(k)))
    }

    fn collect<T>(&self, f: impl FnMut(&Event) -> Option<T>) -> Vec<T> {
        lock(&self.events).iter().filter_map(f).collect()
    }

    pub fn external_correlations(&self) -> Vec<(u64, Vec<ExternalId>)> {
        self.collect(|e| match e {
            Event::External(id, ids) => Some((*id, ids.clone())),
            _ => None,
        })
    }

    pub fn api_calls(&self) -> Vec<ApiCallRecord> {
        self.collect(|e| match e {
            Event::ApiCall(r) => Some(*r),
            _ => None,
        })
    }

    pub fn device_operations(&self) -> Vec<DeviceOperation> {
        self.collect(|e| match e {
            Event::Device(op) => Some(*op),
            _ => None,
        })
    }

    pub fn kernels(&self) -> Vec<KernelRecord> {
        self.collect(|e| match e {
            Event::Device(DeviceOperation::Kernel(r)) => Some(*r),
            _ => None,
        })
    }

    pub fn synchronizations(&self) -> Vec<DeviceSyncRecord> {
        self.collect(|e| match e {
            Event::Sync(r) => Some(*r),
            _ => None,
        })
    }

    pub fn overheads(&self) -> Vec<OverheadRecord> {
        self.collect(|e| match e {
            Event::Overhead(r) => Some(*r),
            _ => None,
        })
    }

    fn push(&self, event: Event) {
        lock(&self.events).push(event);
    }
}

impl EventSink for RecordingSink {
    fn wants(&self, kind: ViewKind) -> bool {
        self.kinds.contains(kind)
    }

    fn on_external_correlation(&self, correlation_id: u64, external: &[ExternalId]) {
        self.push(Event::External(correlation_id, external.to_vec()));
    }

    fn on_api_call(&self, call: &ApiCallRecord) {
        self.push(Event::ApiCall(*call));
    }

    fn on_device_operation(&self, operation: &DeviceOperation) {
        self.push(Event::Device(*operation));
    }

    fn on_synchronization(&self, sync: &DeviceSyncRecord) {
        self.push(Event::Sync(*sync));
    }

    fn on_overhead(&self, overhead: &OverheadRecord) {
        self.push(Event::Overhead(*overhead));
    }
}

/// Client of a [`ViewHandler`] that hands out fixed-size buffers and decodes what it gets
/// back.
#[derive(Debug)]
pub struct RecordingClient {
    buffer_size: usize,
    records: Mutex<Vec<Record>>,
    buffers: Mutex<usize>,
    errors: Mutex<Vec<ViewError>>,
}

impl RecordingClient {
    pub fn new(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer_size,
            records: Mutex::default(),
            buffers: Mutex::default(),
            errors: Mutex::default(),
        })
    }

    /// Registers this client's callbacks with `handler`.
    pub fn attach(self: &Arc<Self>, handler: &ViewHandler) -> Result<(), ViewError> {
        let size = self.buffer_size;
        let client = self.clone();
        handler.set_buffer_callbacks(
            move || vec![0u8; size].into_boxed_slice(),
            move |buffer| {
                *lock(&client.buffers) += 1;
                for record in buffer.records() {
                    match record {
                        Ok(record) => lock(&client.records).push(record),
                        Err(e) => lock(&client.errors).push(e),
                    }
                }
            },
        )
    }

    pub fn records(&self) -> Vec<Record> {
        lock(&self.records).clone()
    }

    pub fn records_of(&self, kind: ViewKind) -> Vec<Record> {
        lock(&self.records)
            .iter()
            .filter(|r| r.kind() == kind)
            .copied()
            .collect()
    }

    /// Number of completed buffers received.
    pub fn buffers(&self) -> usize {
        *lock(&self.buffers)
    }

    /// Errors met while walking the received buffers.
    pub fn errors(&self) -> Vec<ViewError> {
        lock(&self.errors).clone()
    }
}
