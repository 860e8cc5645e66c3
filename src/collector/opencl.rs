// Copyright 2024-2025 Irreducible Inc.

//! OpenCL collector.
//!
//! Every profiled command produces an event that the collector retains until it has read the
//! command's profiling info, so the runtime cannot hand the same handle out again in between.
//! Completion arrives through the event callback, on whatever thread the runtime uses, or is
//! polled on flush.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::DeviceTimer;
use crate::context::{Interest, ViewContext};
use crate::correlation::ApiLayer;
use crate::errors::{DriverError, ViewError};
use crate::record::{
    ApiGroup, DeviceUuid, KernelRecord, MemcpyType, MemoryCopyRecord, MemoryFillRecord,
    MemoryType, SymbolId, SyncType, ViewKind, ViewKindSet,
};
use crate::sink::DeviceOperation;
use crate::utils::{process_id, thread_id};
use crate::view_kinds;

use super::{
    api_ids, ApiCall, Collector, CollectorCounts, CollectorStats, HandleArena, OverheadScope,
    Subscription, SyncTarget,
};

api_ids! {
    /// Intercepted OpenCL functions.
    pub enum OpenClApi {
        ClCreateCommandQueueWithProperties = 1 => "clCreateCommandQueueWithProperties",
        ClReleaseCommandQueue = 2 => "clReleaseCommandQueue",
        ClEnqueueNDRangeKernel = 3 => "clEnqueueNDRangeKernel",
        ClEnqueueTask = 4 => "clEnqueueTask",
        ClEnqueueReadBuffer = 5 => "clEnqueueReadBuffer",
        ClEnqueueWriteBuffer = 6 => "clEnqueueWriteBuffer",
        ClEnqueueCopyBuffer = 7 => "clEnqueueCopyBuffer",
        ClEnqueueFillBuffer = 8 => "clEnqueueFillBuffer",
        ClEnqueueSVMMemcpy = 9 => "clEnqueueSVMMemcpy",
        ClEnqueueSVMMemFill = 10 => "clEnqueueSVMMemFill",
        ClEnqueueMemcpyINTEL = 11 => "clEnqueueMemcpyINTEL",
        ClEnqueueMemFillINTEL = 12 => "clEnqueueMemFillINTEL",
        ClFinish = 13 => "clFinish",
        ClFlush = 14 => "clFlush",
        ClWaitForEvents = 15 => "clWaitForEvents",
        ClReleaseEvent = 16 => "clReleaseEvent",
    }
}

/// `CL_PROFILING_COMMAND_*` values of one command, in device nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfilingInfo {
    pub queued: u64,
    pub submit: u64,
    pub start: u64,
    pub end: u64,
}

/// The OpenCL entry points the collector itself calls.
pub trait OpenClDriver: Send + Sync {
    /// Installs the tracing layer that feeds the collector.
    fn enable_tracing(&self) -> Result<(), DriverError>;

    /// Profiling info of the command behind `event`, `None` while it has not completed.
    fn profiling_info(&self, event: u64) -> Result<Option<ProfilingInfo>, DriverError>;

    fn retain_event(&self, event: u64) -> Result<(), DriverError>;

    fn release_event(&self, event: u64) -> Result<(), DriverError>;
}

struct Queue {
    device_uuid: DeviceUuid,
    context: u64,
    timer: DeviceTimer,
}

#[derive(Clone, Copy)]
enum Operation {
    Kernel,
    Copy { memcpy_type: MemcpyType, bytes: u64 },
    Fill { bytes: u64, pattern_size: u64 },
}

struct Pending {
    operation: Operation,
    name: SymbolId,
    correlation_id: u64,
    invocation_id: u64,
    queue: u64,
    context: u64,
    device_uuid: DeviceUuid,
    timer: DeviceTimer,
    thread_id: u32,
    interest: Interest,
}

#[derive(Default)]
struct State {
    queues: HandleArena<Queue>,
    pending: HashMap<u64, Pending>,
}

/// Collector for the OpenCL runtime.
pub struct OpenClCollector<D> {
    context: Arc<ViewContext>,
    driver: D,
    state: Mutex<State>,
    subscription: Subscription,
    stats: CollectorStats,
}

impl<D: OpenClDriver> OpenClCollector<D> {
    pub fn new(context: Arc<ViewContext>, driver: D) -> Self {
        Self {
            context,
            driver,
            state: Mutex::default(),
            subscription: Subscription::default(),
            stats: CollectorStats::default(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn stats(&self) -> CollectorCounts {
        self.stats.counts()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Prologue of an intercepted OpenCL function.
    pub fn api_call(&self, api: OpenClApi) -> ApiCall<'_> {
        ApiCall::enter(&self.context, ApiLayer::Runtime, ApiGroup::OpenCl, api.id())
    }

    pub fn register_queue(&self, queue: u64, device_uuid: DeviceUuid, context: u64, timer: DeviceTimer) {
        self.lock().queues.insert(
            queue,
            Queue {
                device_uuid,
                context,
                timer,
            },
        );
    }

    pub fn queue_released(&self, queue: u64) {
        self.lock().queues.remove(queue);
    }

    /// Epilogue of `clEnqueueNDRangeKernel` and `clEnqueueTask`.
    pub fn enqueue_kernel(
        &self,
        api: OpenClApi,
        queue: u64,
        kernel_name: &str,
        event: u64,
    ) -> Result<(), ViewError> {
        let _overhead = OverheadScope::new(&self.context, ApiGroup::OpenCl, api.id());
        let name = self.context.intern(kernel_name);
        self.enqueue(queue, Operation::Kernel, name, event)
    }

    /// Epilogue of the buffer and USM copy functions.
    pub fn enqueue_memory_copy(
        &self,
        api: OpenClApi,
        queue: u64,
        bytes: u64,
        src: MemoryType,
        dst: MemoryType,
        event: u64,
    ) -> Result<(), ViewError> {
        let _overhead = OverheadScope::new(&self.context, ApiGroup::OpenCl, api.id());
        let memcpy_type = MemcpyType::new(src, dst);
        let name = self
            .context
            .intern(&format!("{}({memcpy_type})", api.name()));
        self.enqueue(queue, Operation::Copy { memcpy_type, bytes }, name, event)
    }

    /// Epilogue of the buffer and USM fill functions.
    pub fn enqueue_memory_fill(
        &self,
        api: OpenClApi,
        queue: u64,
        bytes: u64,
        pattern_size: u64,
        event: u64,
    ) -> Result<(), ViewError> {
        let _overhead = OverheadScope::new(&self.context, ApiGroup::OpenCl, api.id());
        let name = self.context.intern(api.name());
        self.enqueue(
            queue,
            Operation::Fill {
                bytes,
                pattern_size,
            },
            name,
            event,
        )
    }

    fn enqueue(
        &self,
        queue: u64,
        operation: Operation,
        name: SymbolId,
        event: u64,
    ) -> Result<(), ViewError> {
        let kind = match operation {
            Operation::Kernel => ViewKind::Kernel,
            Operation::Copy { .. } => ViewKind::MemoryCopy,
            Operation::Fill { .. } => ViewKind::MemoryFill,
        };
        let interest = self.context.interest(kind);
        if interest.is_empty() {
            return Ok(());
        }

        self.driver.retain_event(event)?;
        let correlation_id = self.context.claim_correlation_id();

        let mut state = self.lock();
        let (device_uuid, context, timer) = match state.queues.get_by_handle(queue) {
            Some(q) => (q.device_uuid, q.context, q.timer),
            None => {
                tracing::debug!(queue, "enqueue to an untracked queue");
                (DeviceUuid::default(), 0, DeviceTimer::host_aligned(0))
            }
        };
        let replaced = state.pending.insert(
            event,
            Pending {
                operation,
                name,
                correlation_id,
                invocation_id: self.context.next_invocation_id(),
                queue,
                context,
                device_uuid,
                timer,
                thread_id: thread_id(),
                interest,
            },
        );
        drop(state);
        // the event is retained once per enqueue, the earlier operation gives its retain back
        if let Some(replaced) = replaced {
            tracing::warn!(
                event,
                correlation_id = replaced.correlation_id,
                "event reused before its operation completed"
            );
            self.stats.lost();
            self.release(event);
        }
        Ok(())
    }

    /// Completion callback of a tracked event. May run on any thread.
    pub fn event_completed(&self, event: u64) -> Result<(), ViewError> {
        let Some(pending) = self.lock().pending.remove(&event) else {
            tracing::debug!(event, "completion of an untracked event");
            return Ok(());
        };
        self.complete(event, pending).map(|_| ())
    }

    /// Returns `Ok(false)` when the command has not finished yet; it stays tracked.
    fn complete(&self, event: u64, pending: Pending) -> Result<bool, ViewError> {
        let info = match self.driver.profiling_info(event) {
            Ok(Some(info)) => info,
            Ok(None) => {
                self.lock().pending.insert(event, pending);
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!(
                    correlation_id = pending.correlation_id,
                    "failed to read profiling info: {e}"
                );
                self.stats.lost();
                self.release(event);
                return Err(e.into());
            }
        };

        self.release(event);
        self.emit(&pending, info);
        Ok(true)
    }

    fn release(&self, event: u64) {
        if let Err(e) = self.driver.release_event(event) {
            tracing::warn!(event, "failed to release event: {e}");
        }
    }

    /// Epilogue of `clFinish` or `clWaitForEvents`.
    pub fn host_synchronized(
        &self,
        call: &ApiCall<'_>,
        sync_type: SyncType,
        handle: u64,
        return_code: i32,
    ) -> Result<(), ViewError> {
        let mut target = SyncTarget::default();
        match sync_type {
            SyncType::HostEvent => target.event = handle,
            _ => target.queue = handle,
        }
        if let Some(queue) = self.lock().queues.get_by_handle(handle) {
            target.context = queue.context;
            target.device_uuid = queue.device_uuid;
        }
        call.synchronized(sync_type, target, return_code);
        self.poll().map(|_| ())
    }

    /// Reads the profiling info of every tracked command that finished. Returns how many did.
    pub fn poll(&self) -> Result<usize, ViewError> {
        let events: Vec<u64> = self.lock().pending.keys().copied().collect();
        let mut completed = 0;
        let mut first_error = None;

        for event in events {
            // the completion callback may have taken it in the meantime
            let Some(pending) = self.lock().pending.remove(&event) else {
                continue;
            };
            match self.complete(event, pending) {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.lock().pending.len()
    }

    fn emit(&self, pending: &Pending, info: ProfilingInfo) {
        let timer = pending.timer;
        let append_timestamp = timer.to_host_ns(info.queued);
        let submit_timestamp = timer.to_host_ns(info.submit);
        let (start_timestamp, end_timestamp) = timer.to_host_interval(info.start, info.end);
        let process_id = process_id();

        let operation = match pending.operation {
            Operation::Kernel => DeviceOperation::Kernel(KernelRecord {
                correlation_id: pending.correlation_id,
                kernel_id: pending.invocation_id,
                queue_id: pending.queue,
                context_handle: pending.context,
                device_uuid: pending.device_uuid,
                process_id,
                thread_id: pending.thread_id,
                name: pending.name,
                api_group: ApiGroup::OpenCl as u32,
                append_timestamp,
                submit_timestamp,
                start_timestamp,
                end_timestamp,
                ..KernelRecord::new()
            }),
            Operation::Copy { memcpy_type, bytes } => {
                DeviceOperation::MemoryCopy(MemoryCopyRecord {
                    correlation_id: pending.correlation_id,
                    memcpy_id: pending.invocation_id,
                    queue_id: pending.queue,
                    context_handle: pending.context,
                    device_uuid: pending.device_uuid,
                    process_id,
                    thread_id: pending.thread_id,
                    name: pending.name,
                    memcpy_type,
                    src_memory: memcpy_type.src() as u32,
                    dst_memory: memcpy_type.dst() as u32,
                    api_group: ApiGroup::OpenCl as u32,
                    bytes,
                    append_timestamp,
                    submit_timestamp,
                    start_timestamp,
                    end_timestamp,
                    ..MemoryCopyRecord::new()
                })
            }
            Operation::Fill {
                bytes,
                pattern_size,
            } => DeviceOperation::MemoryFill(MemoryFillRecord {
                correlation_id: pending.correlation_id,
                fill_id: pending.invocation_id,
                queue_id: pending.queue,
                context_handle: pending.context,
                device_uuid: pending.device_uuid,
                process_id,
                thread_id: pending.thread_id,
                name: pending.name,
                api_group: ApiGroup::OpenCl as u32,
                bytes,
                pattern_size,
                append_timestamp,
                submit_timestamp,
                start_timestamp,
                end_timestamp,
                ..MemoryFillRecord::new()
            }),
        };

        self.stats
            .check_monotonic(self.name(), pending.correlation_id, operation.timestamps());
        self.stats.completed();
        pending.interest.device_operation(&operation);
    }
}

impl<D: OpenClDriver> Collector for OpenClCollector<D> {
    fn name(&self) -> &'static str {
        "opencl"
    }

    fn supported_kinds(&self) -> ViewKindSet {
        view_kinds![
            Kernel,
            MemoryCopy,
            MemoryFill,
            RuntimeApiCall,
            DeviceSynchronization,
        ]
    }

    fn subscribe(&self) -> Result<(), ViewError> {
        self.subscription
            .subscribe(self.name(), || self.driver.enable_tracing())
    }

    fn flush(&self) -> Result<(), ViewError> {
        self.poll().map(|_| ())
    }

    fn counts(&self) -> CollectorCounts {
        self.stats()
    }
}
