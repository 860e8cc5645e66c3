// Copyright 2024-2025 Irreducible Inc.

//! Level Zero collector.
//!
//! Device operations are tracked from append to completion:
//! * on an immediate command list an operation is submitted when it is appended, and takes the
//!   correlation id of the append call;
//! * on a regular command list the appended operations are kept as templates, and every
//!   execution creates new instances correlated with the execute call.
//!
//! Each instance waits on a signal event whose kernel timestamp gives the device interval. When
//! the application did not pass an event, the collector creates its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::DeviceTimer;
use crate::context::{Interest, RuntimeLaunch, ViewContext};
use crate::correlation::ApiLayer;
use crate::errors::{DriverError, ViewError};
use crate::record::{
    ApiGroup, DeviceUuid, KernelRecord, MemcpyType, MemoryCopyP2pRecord, MemoryCopyRecord,
    MemoryFillRecord, MemoryType, SymbolId, SyncType, ViewKind, ViewKindSet,
};
use crate::sink::DeviceOperation;
use crate::utils::{process_id, thread_id};
use crate::view_kinds;

use super::{
    api_ids, ApiCall, ArenaKey, Collector, CollectorCounts, CollectorStats, HandleArena,
    OverheadScope, Subscription, SyncTarget,
};

api_ids! {
    /// Intercepted Level Zero functions.
    pub enum LevelZeroApi {
        ZeInit = 1 => "zeInit",
        ZeCommandListCreate = 2 => "zeCommandListCreate",
        ZeCommandListCreateImmediate = 3 => "zeCommandListCreateImmediate",
        ZeCommandListDestroy = 4 => "zeCommandListDestroy",
        ZeCommandListReset = 5 => "zeCommandListReset",
        ZeCommandListAppendLaunchKernel = 6 => "zeCommandListAppendLaunchKernel",
        ZeCommandListAppendMemoryCopy = 7 => "zeCommandListAppendMemoryCopy",
        ZeCommandListAppendMemoryFill = 8 => "zeCommandListAppendMemoryFill",
        ZeCommandListAppendBarrier = 9 => "zeCommandListAppendBarrier",
        ZeCommandListHostSynchronize = 10 => "zeCommandListHostSynchronize",
        ZeCommandQueueCreate = 11 => "zeCommandQueueCreate",
        ZeCommandQueueExecuteCommandLists = 12 => "zeCommandQueueExecuteCommandLists",
        ZeCommandQueueSynchronize = 13 => "zeCommandQueueSynchronize",
        ZeEventPoolCreate = 14 => "zeEventPoolCreate",
        ZeEventCreate = 15 => "zeEventCreate",
        ZeEventDestroy = 16 => "zeEventDestroy",
        ZeEventHostReset = 17 => "zeEventHostReset",
        ZeEventHostSynchronize = 18 => "zeEventHostSynchronize",
        ZeEventQueryStatus = 19 => "zeEventQueryStatus",
        ZeFenceHostSynchronize = 20 => "zeFenceHostSynchronize",
        ZeModuleCreate = 21 => "zeModuleCreate",
        ZeKernelCreate = 22 => "zeKernelCreate",
        ZeKernelDestroy = 23 => "zeKernelDestroy",
        ZeMemAllocDevice = 24 => "zeMemAllocDevice",
        ZeMemAllocHost = 25 => "zeMemAllocHost",
        ZeMemAllocShared = 26 => "zeMemAllocShared",
        ZeMemFree = 27 => "zeMemFree",
    }
}

/// Start and end of a device operation, in device timer ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelTimestamps {
    pub start: u64,
    pub end: u64,
}

/// The Level Zero entry points the collector itself calls.
pub trait LevelZeroDriver: Send + Sync {
    /// Installs the tracer callbacks that feed the collector.
    fn enable_tracing(&self) -> Result<(), DriverError>;

    /// Timestamps of the operation that signalled `event`, `None` while it is still running.
    fn query_kernel_timestamp(&self, event: u64) -> Result<Option<KernelTimestamps>, DriverError>;

    /// Creates a timestamp event in `context` for operations appended without one.
    fn create_timestamp_event(&self, context: u64) -> Result<u64, DriverError>;

    fn reset_event(&self, event: u64) -> Result<(), DriverError>;

    fn destroy_event(&self, event: u64) -> Result<(), DriverError>;
}

/// Source and destination of an appended copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyParams {
    pub bytes: u64,
    pub src: MemoryType,
    pub dst: MemoryType,
    /// Devices owning the allocations; a copy between two different devices is peer to peer.
    pub src_device: Option<u64>,
    pub dst_device: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillParams {
    pub bytes: u64,
    pub pattern_size: u64,
    pub value: u64,
    pub memory: MemoryType,
}

struct Device {
    uuid: DeviceUuid,
    timer: DeviceTimer,
}

struct CommandList {
    device: u64,
    context: u64,
    immediate: bool,
    templates: Vec<Command>,
}

#[derive(Clone, Copy)]
enum Operation {
    Kernel {
        name: SymbolId,
        launch: Option<RuntimeLaunch>,
    },
    Copy {
        name: SymbolId,
        params: CopyParams,
    },
    Fill {
        name: SymbolId,
        params: FillParams,
    },
}

impl Operation {
    fn kind(&self) -> ViewKind {
        match self {
            Operation::Kernel { .. } => ViewKind::Kernel,
            Operation::Copy { params, .. } if is_peer_to_peer(params) => ViewKind::MemoryCopyP2p,
            Operation::Copy { .. } => ViewKind::MemoryCopy,
            Operation::Fill { .. } => ViewKind::MemoryFill,
        }
    }
}

fn is_peer_to_peer(params: &CopyParams) -> bool {
    matches!((params.src_device, params.dst_device), (Some(src), Some(dst)) if src != dst)
}

/// An appended operation.
#[derive(Clone)]
struct Command {
    operation: Operation,
    event: u64,
    owned_event: bool,
    append_timestamp: u64,
    thread_id: u32,
    // set for immediate command lists, claimed at append
    correlation_id: Option<u64>,
    interest: Interest,
}

/// One submission of a command, waiting for its completion.
struct InFlight {
    command: Command,
    event: ArenaKey,
    list: ArenaKey,
    correlation_id: u64,
    invocation_id: u64,
    queue_id: u64,
    context: u64,
    device_uuid: DeviceUuid,
    src_device_uuid: DeviceUuid,
    timer: DeviceTimer,
    submit_timestamp: u64,
}

#[derive(Default)]
struct EventInfo {
    // created by the collector, not the application
    owned: bool,
}

#[derive(Default)]
struct State {
    devices: HashMap<u64, Device>,
    lists: HandleArena<CommandList>,
    kernels: HandleArena<SymbolId>,
    events: HandleArena<EventInfo>,
    in_flight: Vec<InFlight>,
}

/// Collector for the Level Zero driver layer.
pub struct LevelZeroCollector<D> {
    context: Arc<ViewContext>,
    driver: D,
    state: Mutex<State>,
    subscription: Subscription,
    stats: CollectorStats,
}

impl<D: LevelZeroDriver> LevelZeroCollector<D> {
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

    /// Prologue of an intercepted driver function.
    pub fn api_call(&self, api: LevelZeroApi) -> ApiCall<'_> {
        ApiCall::enter(&self.context, ApiLayer::Driver, ApiGroup::LevelZero, api.id())
    }

    pub fn register_device(&self, device: u64, uuid: DeviceUuid, timer: DeviceTimer) {
        tracing::debug!(device, "level zero device registered");
        self.lock().devices.insert(device, Device { uuid, timer });
    }

    pub fn command_list_created(&self, list: u64, device: u64, context: u64, immediate: bool) {
        let _overhead = OverheadScope::new(
            &self.context,
            ApiGroup::LevelZero,
            if immediate {
                LevelZeroApi::ZeCommandListCreateImmediate
            } else {
                LevelZeroApi::ZeCommandListCreate
            }
            .id(),
        );
        let mut state = self.lock();
        if let Some(stale) = state.lists.get_by_handle(list) {
            let templates = stale.templates.clone();
            self.release_templates(&mut state, &templates);
        }
        state.lists.insert(
            list,
            CommandList {
                device,
                context,
                immediate,
                templates: Vec::new(),
            },
        );
    }

    /// Prologue of `zeCommandListReset`. Operations of the list that already completed are
    /// reported, the others are dropped.
    pub fn command_list_reset(&self, list: u64) {
        self.retire_list(list, false);
    }

    /// Prologue of `zeCommandListDestroy`.
    pub fn command_list_destroyed(&self, list: u64) {
        self.retire_list(list, true);
    }

    fn retire_list(&self, list: u64, destroy: bool) {
        let _overhead = OverheadScope::new(
            &self.context,
            ApiGroup::LevelZero,
            if destroy {
                LevelZeroApi::ZeCommandListDestroy
            } else {
                LevelZeroApi::ZeCommandListReset
            }
            .id(),
        );
        let ready = {
            let mut state = self.lock();
            let Some(key) = state.lists.key(list) else {
                tracing::debug!(list, "untracked command list");
                return;
            };
            let ready = self.collect_completed(&mut state, |op| op.list == key);
            self.drop_in_flight(&mut state, |op| op.list == key, "command list reset");

            let templates = state
                .lists
                .get_mut(key)
                .map(|l| std::mem::take(&mut l.templates))
                .unwrap_or_default();
            self.release_templates(&mut state, &templates);
            if destroy {
                state.lists.remove(list);
            } else {
                state.lists.renew(list);
            }
            ready
        };
        self.emit_all(ready);
    }

    pub fn kernel_created(&self, kernel: u64, name: &str) {
        let name = self.context.intern(name);
        self.lock().kernels.insert(kernel, name);
    }

    pub fn kernel_destroyed(&self, kernel: u64) {
        self.lock().kernels.remove(kernel);
    }

    pub fn event_created(&self, event: u64) {
        self.lock().events.insert(event, EventInfo::default());
    }

    /// Prologue of `zeEventHostReset`. The event's previous completion is read before the
    /// application reuses it.
    pub fn event_reset(&self, event: u64) {
        self.retire_event(event, false);
    }

    /// Prologue of `zeEventDestroy`.
    pub fn event_destroyed(&self, event: u64) {
        self.retire_event(event, true);
    }

    fn retire_event(&self, event: u64, destroy: bool) {
        let _overhead = OverheadScope::new(
            &self.context,
            ApiGroup::LevelZero,
            if destroy {
                LevelZeroApi::ZeEventDestroy
            } else {
                LevelZeroApi::ZeEventHostReset
            }
            .id(),
        );
        let ready = {
            let mut state = self.lock();
            let Some(key) = state.events.key(event) else {
                return;
            };
            let ready = self.collect_completed(&mut state, |op| op.event == key);
            self.drop_in_flight(&mut state, |op| op.event == key, "event reused");
            if destroy {
                state.events.remove(event);
            } else {
                state.events.renew(event);
            }
            ready
        };
        self.emit_all(ready);
    }

    /// Epilogue of `zeCommandListAppendLaunchKernel`.
    ///
    /// Returns the event the launch must signal: the application's own, or one created by the
    /// collector when the kernel is profiled and the application passed none.
    pub fn append_kernel(
        &self,
        list: u64,
        kernel: u64,
        signal_event: Option<u64>,
    ) -> Result<Option<u64>, ViewError> {
        let _overhead = OverheadScope::new(
            &self.context,
            ApiGroup::LevelZero,
            LevelZeroApi::ZeCommandListAppendLaunchKernel.id(),
        );
        let launch = self.context.runtime_launch();
        let name = self
            .lock()
            .kernels
            .get_by_handle(kernel)
            .copied()
            .or(launch.map(|l| l.name))
            .unwrap_or_default();
        self.append(list, Operation::Kernel { name, launch }, signal_event)
    }

    /// Epilogue of `zeCommandListAppendMemoryCopy`.
    pub fn append_memory_copy(
        &self,
        list: u64,
        params: CopyParams,
        signal_event: Option<u64>,
    ) -> Result<Option<u64>, ViewError> {
        let api = LevelZeroApi::ZeCommandListAppendMemoryCopy;
        let _overhead = OverheadScope::new(&self.context, ApiGroup::LevelZero, api.id());
        let memcpy_type = MemcpyType::new(params.src, params.dst);
        let name = self
            .context
            .intern(&format!("{}({memcpy_type})", api.name()));
        self.append(list, Operation::Copy { name, params }, signal_event)
    }

    /// Epilogue of `zeCommandListAppendMemoryFill`.
    pub fn append_memory_fill(
        &self,
        list: u64,
        params: FillParams,
        signal_event: Option<u64>,
    ) -> Result<Option<u64>, ViewError> {
        let api = LevelZeroApi::ZeCommandListAppendMemoryFill;
        let _overhead = OverheadScope::new(&self.context, ApiGroup::LevelZero, api.id());
        let name = self
            .context
            .intern(&format!("{}({})", api.name(), params.memory.letter()));
        self.append(list, Operation::Fill { name, params }, signal_event)
    }

    fn append(
        &self,
        list: u64,
        operation: Operation,
        signal_event: Option<u64>,
    ) -> Result<Option<u64>, ViewError> {
        let interest = self.context.interest(operation.kind());
        if interest.is_empty() {
            return Ok(signal_event);
        }

        let append_timestamp = self.context.timestamp();
        let mut state = self.lock();
        let Some(list_key) = state.lists.key(list) else {
            tracing::debug!(list, "append to an untracked command list");
            self.stats.lost();
            return Ok(signal_event);
        };
        let (immediate, list_context) = state
            .lists
            .get(list_key)
            .map(|l| (l.immediate, l.context))
            .unwrap_or_default();

        let (event, owned_event) = match signal_event {
            Some(event) => {
                if state.events.key(event).is_none() {
                    state.events.insert(event, EventInfo::default());
                }
                (event, false)
            }
            None => {
                let event = self.driver.create_timestamp_event(list_context)?;
                state.events.insert(event, EventInfo { owned: true });
                (event, true)
            }
        };

        let mut command = Command {
            operation,
            event,
            owned_event,
            append_timestamp,
            thread_id: thread_id(),
            correlation_id: None,
            interest,
        };

        if immediate {
            command.correlation_id = Some(self.context.claim_correlation_id());
            self.submit(&mut state, list_key, list, command, append_timestamp);
        } else if let Some(list) = state.lists.get_mut(list_key) {
            list.templates.push(command);
        }

        Ok(Some(event))
    }

    fn submit(
        &self,
        state: &mut State,
        list: ArenaKey,
        queue_id: u64,
        command: Command,
        submit_timestamp: u64,
    ) {
        let Some(event) = state.events.key(command.event) else {
            self.stats.lost();
            return;
        };
        let Some(list_state) = state.lists.get(list) else {
            self.stats.lost();
            return;
        };
        let (device_uuid, timer) = device_info(&state.devices, list_state.device);
        let src_device_uuid = match command.operation {
            Operation::Copy { params, .. } => params
                .src_device
                .map(|device| device_info(&state.devices, device).0)
                .unwrap_or(device_uuid),
            _ => device_uuid,
        };
        let context = list_state.context;
        let correlation_id = command
            .correlation_id
            .unwrap_or_else(|| self.context.claim_correlation_id());

        state.in_flight.push(InFlight {
            command,
            event,
            list,
            correlation_id,
            invocation_id: self.context.next_invocation_id(),
            queue_id,
            context,
            device_uuid,
            src_device_uuid,
            timer,
            submit_timestamp,
        });
    }

    /// Epilogue of `zeCommandQueueExecuteCommandLists`: submits every operation appended to the
    /// regular command lists.
    pub fn execute_command_lists(&self, queue: u64, lists: &[u64]) -> Result<(), ViewError> {
        let _overhead = OverheadScope::new(
            &self.context,
            ApiGroup::LevelZero,
            LevelZeroApi::ZeCommandQueueExecuteCommandLists.id(),
        );
        let submit_timestamp = self.context.timestamp();
        let mut first_error = None;

        let ready = {
            let mut state = self.lock();
            let mut ready = Vec::new();
            for &list in lists {
                let Some(key) = state.lists.key(list) else {
                    tracing::debug!(list, "executing an untracked command list");
                    continue;
                };
                let templates = match state.lists.get(key) {
                    Some(l) if !l.immediate => l.templates.clone(),
                    _ => continue,
                };

                for command in templates {
                    let Some(event) = state.events.key(command.event) else {
                        self.stats.lost();
                        continue;
                    };
                    // the previous execution of this command still owns the event
                    if state.in_flight.iter().any(|op| op.event == event) {
                        ready.extend(self.collect_completed(&mut state, |op| op.event == event));
                        self.drop_in_flight(&mut state, |op| op.event == event, "event reused");
                    }
                    if command.owned_event {
                        if let Err(e) = self.driver.reset_event(command.event) {
                            tracing::warn!("failed to reset timestamp event: {e}");
                            self.stats.lost();
                            first_error.get_or_insert(e);
                            continue;
                        }
                    }
                    self.submit(&mut state, key, queue, command, submit_timestamp);
                }
            }
            ready
        };
        self.emit_all(ready);

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Epilogue of a host wait (`zeEventHostSynchronize`, `zeCommandQueueSynchronize`, ...).
    ///
    /// Emits the synchronization record and reports every operation that completed by now.
    pub fn host_synchronized(
        &self,
        call: &ApiCall<'_>,
        sync_type: SyncType,
        handle: u64,
        return_code: i32,
    ) -> Result<(), ViewError> {
        let mut target = SyncTarget::default();
        match sync_type {
            SyncType::HostEvent | SyncType::HostFence => target.event = handle,
            _ => target.queue = handle,
        }
        if let Some(list) = self.lock().lists.get_by_handle(handle) {
            target.context = list.context;
        }
        call.synchronized(sync_type, target, return_code);

        self.process_completions().map(|_| ())
    }

    /// Reports all operations whose timestamps are available. Returns how many completed.
    pub fn process_completions(&self) -> Result<usize, ViewError> {
        let (ready, first_error) = {
            let mut state = self.lock();
            let mut first_error = None;
            let ready = self.collect_completed_with(&mut state, |_| true, &mut first_error);
            (ready, first_error)
        };
        let completed = ready.len();
        self.emit_all(ready);

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(completed),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn collect_completed(
        &self,
        state: &mut State,
        filter: impl Fn(&InFlight) -> bool,
    ) -> Vec<(InFlight, KernelTimestamps)> {
        let mut first_error = None;
        self.collect_completed_with(state, filter, &mut first_error)
    }

    fn collect_completed_with(
        &self,
        state: &mut State,
        filter: impl Fn(&InFlight) -> bool,
        first_error: &mut Option<DriverError>,
    ) -> Vec<(InFlight, KernelTimestamps)> {
        let mut ready = Vec::new();
        let mut pending = Vec::with_capacity(state.in_flight.len());

        for op in std::mem::take(&mut state.in_flight) {
            if !filter(&op) {
                pending.push(op);
                continue;
            }
            if !state.events.contains(op.event) {
                tracing::debug!(
                    correlation_id = op.correlation_id,
                    "signal event was recycled before completion"
                );
                self.stats.lost();
                continue;
            }

            match self.driver.query_kernel_timestamp(op.command.event) {
                Ok(Some(timestamps)) => {
                    if self.owns_event_alone(state, &op) {
                        // immediate submissions own their event alone
                        self.destroy_owned_event(state, op.command.event);
                    }
                    ready.push((op, timestamps));
                }
                Ok(None) => pending.push(op),
                Err(e) => {
                    tracing::warn!(
                        correlation_id = op.correlation_id,
                        "failed to read device timestamps: {e}"
                    );
                    if self.owns_event_alone(state, &op) {
                        self.destroy_owned_event(state, op.command.event);
                    }
                    self.stats.lost();
                    first_error.get_or_insert(e);
                }
            }
        }

        state.in_flight = pending;
        ready
    }

    fn owns_event_alone(&self, state: &State, op: &InFlight) -> bool {
        let owned = state.events.get(op.event).is_some_and(|event| event.owned);
        owned && op.command.correlation_id.is_some()
    }

    fn drop_in_flight(&self, state: &mut State, filter: impl Fn(&InFlight) -> bool, reason: &str) {
        let (dropped, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut state.in_flight).into_iter().partition(|op| filter(op));
        state.in_flight = kept;

        for op in &dropped {
            if self.owns_event_alone(state, op) {
                self.destroy_owned_event(state, op.command.event);
            }
            self.stats.lost();
        }
        if !dropped.is_empty() {
            tracing::warn!(
                "{} device operations dropped before completion: {reason}",
                dropped.len()
            );
        }
    }

    fn release_templates(&self, state: &mut State, templates: &[Command]) {
        for command in templates.iter().filter(|c| c.owned_event) {
            self.destroy_owned_event(state, command.event);
        }
    }

    fn destroy_owned_event(&self, state: &mut State, event: u64) {
        state.events.remove(event);
        if let Err(e) = self.driver.destroy_event(event) {
            tracing::warn!(event, "failed to destroy timestamp event: {e}");
        }
    }

    fn emit_all(&self, ready: Vec<(InFlight, KernelTimestamps)>) {
        for (op, timestamps) in ready {
            self.emit(op, timestamps);
        }
    }

    fn emit(&self, op: InFlight, timestamps: KernelTimestamps) {
        let (start_timestamp, end_timestamp) =
            op.timer.to_host_interval(timestamps.start, timestamps.end);
        let command = &op.command;
        let process_id = process_id();

        let operation = match command.operation {
            Operation::Kernel { name, launch } => {
                let launch = launch.unwrap_or_default();
                DeviceOperation::Kernel(KernelRecord {
                    correlation_id: op.correlation_id,
                    kernel_id: op.invocation_id,
                    queue_id: op.queue_id,
                    context_handle: op.context,
                    device_uuid: op.device_uuid,
                    process_id,
                    thread_id: command.thread_id,
                    name,
                    source_file: launch.source_file,
                    source_line: launch.source_line,
                    api_group: ApiGroup::LevelZero as u32,
                    sycl_node_id: launch.node_id,
                    sycl_invocation_id: launch.invocation_id,
                    sycl_queue_id: launch.queue_id,
                    sycl_task_begin_timestamp: launch.task_begin_timestamp,
                    sycl_enqueue_begin_timestamp: launch.enqueue_begin_timestamp,
                    append_timestamp: command.append_timestamp,
                    submit_timestamp: op.submit_timestamp,
                    start_timestamp,
                    end_timestamp,
                    ..KernelRecord::new()
                })
            }
            Operation::Copy { name, params } if is_peer_to_peer(&params) => {
                DeviceOperation::MemoryCopyP2p(MemoryCopyP2pRecord {
                    correlation_id: op.correlation_id,
                    memcpy_id: op.invocation_id,
                    queue_id: op.queue_id,
                    context_handle: op.context,
                    src_device_uuid: op.src_device_uuid,
                    dst_device_uuid: op.device_uuid,
                    process_id,
                    thread_id: command.thread_id,
                    name,
                    memcpy_type: MemcpyType::new(params.src, params.dst),
                    src_memory: params.src as u32,
                    dst_memory: params.dst as u32,
                    api_group: ApiGroup::LevelZero as u32,
                    bytes: params.bytes,
                    append_timestamp: command.append_timestamp,
                    submit_timestamp: op.submit_timestamp,
                    start_timestamp,
                    end_timestamp,
                    ..MemoryCopyP2pRecord::new()
                })
            }
            Operation::Copy { name, params } => DeviceOperation::MemoryCopy(MemoryCopyRecord {
                correlation_id: op.correlation_id,
                memcpy_id: op.invocation_id,
                queue_id: op.queue_id,
                context_handle: op.context,
                device_uuid: op.device_uuid,
                process_id,
                thread_id: command.thread_id,
                name,
                memcpy_type: MemcpyType::new(params.src, params.dst),
                src_memory: params.src as u32,
                dst_memory: params.dst as u32,
                api_group: ApiGroup::LevelZero as u32,
                bytes: params.bytes,
                append_timestamp: command.append_timestamp,
                submit_timestamp: op.submit_timestamp,
                start_timestamp,
                end_timestamp,
                ..MemoryCopyRecord::new()
            }),
            Operation::Fill { name, params } => DeviceOperation::MemoryFill(MemoryFillRecord {
                correlation_id: op.correlation_id,
                fill_id: op.invocation_id,
                queue_id: op.queue_id,
                context_handle: op.context,
                device_uuid: op.device_uuid,
                process_id,
                thread_id: command.thread_id,
                name,
                memory_type: params.memory as u32,
                api_group: ApiGroup::LevelZero as u32,
                bytes: params.bytes,
                value_for_set: params.value,
                pattern_size: params.pattern_size,
                append_timestamp: command.append_timestamp,
                submit_timestamp: op.submit_timestamp,
                start_timestamp,
                end_timestamp,
                ..MemoryFillRecord::new()
            }),
        };

        self.stats
            .check_monotonic(self.name(), op.correlation_id, operation.timestamps());
        self.stats.completed();
        command.interest.device_operation(&operation);
    }
}

fn device_info(devices: &HashMap<u64, Device>, device: u64) -> (DeviceUuid, DeviceTimer) {
    match devices.get(&device) {
        Some(device) => (device.uuid, device.timer),
        // unknown devices are assumed to tick on the host clock
        None => (DeviceUuid::default(), DeviceTimer::host_aligned(0)),
    }
}

impl<D: LevelZeroDriver> Collector for LevelZeroCollector<D> {
    fn name(&self) -> &'static str {
        "level_zero"
    }

    fn supported_kinds(&self) -> ViewKindSet {
        view_kinds![
            Kernel,
            MemoryCopy,
            MemoryCopyP2p,
            MemoryFill,
            DriverApiCall,
            DeviceSynchronization,
        ]
    }

    fn subscribe(&self) -> Result<(), ViewError> {
        self.subscription
            .subscribe(self.name(), || self.driver.enable_tracing())
    }

    fn flush(&self) -> Result<(), ViewError> {
        self.process_completions().map(|_| ())
    }

    fn counts(&self) -> CollectorCounts {
        self.stats()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::record::ViewRecord;
    use crate::test_utils::{MockLevelZeroDriver, RecordingSink};

    const DEVICE: u64 = 0xd0;
    const CONTEXT: u64 = 0xc0;
    const QUEUE: u64 = 0x50;
    const KERNEL: u64 = 0x70;

    fn setup() -> (
        Arc<ViewContext>,
        LevelZeroCollector<MockLevelZeroDriver>,
        Arc<RecordingSink>,
    ) {
        let context = Arc::new(ViewContext::new());
        let sink = Arc::new(RecordingSink::all());
        context.sinks().add_internal(sink.clone());

        let collector = LevelZeroCollector::new(context.clone(), MockLevelZeroDriver::new());
        collector.register_device(DEVICE, [7; 16], DeviceTimer::host_aligned(0));
        collector.kernel_created(KERNEL, "vector_add");
        (context, collector, sink)
    }

    #[test]
    fn immediate_kernel_is_correlated_with_append() {
        let (context, collector, sink) = setup();
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);

        let call = collector.api_call(LevelZeroApi::ZeCommandListAppendLaunchKernel);
        let event = collector.append_kernel(0x10, KERNEL, None).unwrap().unwrap();
        let correlation_id = call.correlation_id();
        call.finish(0);

        assert_eq!(collector.process_completions().unwrap(), 1);
        assert_eq!(collector.in_flight(), 0);
        // the collector-created event is gone after completion
        assert_eq!(collector.driver().destroyed_events(), vec![event]);

        let kernels = sink.kernels();
        assert_eq!(kernels.len(), 1);
        let kernel = kernels[0];
        assert_eq!(kernel.correlation_id, correlation_id);
        assert_eq!(kernel.queue_id, 0x10);
        assert_eq!(kernel.device_uuid, [7; 16]);
        assert_eq!(
            context.symbols().resolve(kernel.name).as_deref(),
            Some("vector_add")
        );
        assert!(kernel.append_timestamp <= kernel.submit_timestamp);
        assert!(kernel.submit_timestamp <= kernel.start_timestamp);
        assert!(kernel.start_timestamp <= kernel.end_timestamp);

        let calls = sink.api_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind(), ViewKind::DriverApiCall);
        assert_eq!(calls[0].name(), Some("zeCommandListAppendLaunchKernel"));
    }

    #[test]
    fn regular_list_executions_get_distinct_ids() {
        let (_context, collector, sink) = setup();
        collector.command_list_created(0x20, DEVICE, CONTEXT, false);
        collector.append_kernel(0x20, KERNEL, None).unwrap();
        assert_eq!(collector.in_flight(), 0);

        for _ in 0..2 {
            let call = collector.api_call(LevelZeroApi::ZeCommandQueueExecuteCommandLists);
            collector.execute_command_lists(QUEUE, &[0x20]).unwrap();
            call.finish(0);
            collector.process_completions().unwrap();
        }

        let kernels = sink.kernels();
        assert_eq!(kernels.len(), 2);
        assert_ne!(kernels[0].correlation_id, kernels[1].correlation_id);
        assert_ne!(kernels[0].kernel_id, kernels[1].kernel_id);
        assert!(kernels.iter().all(|k| k.queue_id == QUEUE));
        // template events are reused, so they are reset before each execution
        assert_eq!(collector.driver().reset_events().len(), 2);
    }

    #[test]
    fn reset_event_does_not_alias_recycled_handle() {
        let (_context, collector, sink) = setup();
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        collector.event_created(0xe1);

        collector.driver().hold(0xe1);
        collector.append_kernel(0x10, KERNEL, Some(0xe1)).unwrap();
        // the application resets the event before the kernel finished
        collector.event_reset(0xe1);
        assert_eq!(collector.in_flight(), 0);
        assert_eq!(collector.stats().lost, 1);

        // the same handle now signals a new kernel
        collector.driver().release_hold(0xe1);
        collector.append_kernel(0x10, KERNEL, Some(0xe1)).unwrap();
        collector.process_completions().unwrap();
        assert_eq!(sink.kernels().len(), 1);
    }

    #[test]
    fn completed_work_is_reported_before_event_destroy() {
        let (_context, collector, sink) = setup();
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        collector.append_kernel(0x10, KERNEL, Some(0xe2)).unwrap();
        collector.event_destroyed(0xe2);
        assert_eq!(sink.kernels().len(), 1);
        assert_eq!(collector.stats().lost, 0);
    }

    #[test]
    fn peer_to_peer_copy_and_fill() {
        let (_context, collector, sink) = setup();
        collector.register_device(0xd1, [9; 16], DeviceTimer::host_aligned(0));
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);

        collector
            .append_memory_copy(
                0x10,
                CopyParams {
                    bytes: 4096,
                    src: MemoryType::Device,
                    dst: MemoryType::Device,
                    src_device: Some(0xd1),
                    dst_device: Some(DEVICE),
                },
                None,
            )
            .unwrap();
        collector
            .append_memory_copy(
                0x10,
                CopyParams {
                    bytes: 64,
                    src: MemoryType::Host,
                    dst: MemoryType::Device,
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        collector
            .append_memory_fill(
                0x10,
                FillParams {
                    bytes: 256,
                    pattern_size: 4,
                    value: 0xff,
                    memory: MemoryType::Shared,
                },
                None,
            )
            .unwrap();
        collector.process_completions().unwrap();

        let operations = sink.device_operations();
        assert_eq!(operations.len(), 3);
        match operations[0] {
            DeviceOperation::MemoryCopyP2p(r) => {
                assert_eq!(r.src_device_uuid, [9; 16]);
                assert_eq!(r.dst_device_uuid, [7; 16]);
                assert_eq!(r.bytes, 4096);
            }
            other => panic!("unexpected {other:?}"),
        }
        match operations[1] {
            DeviceOperation::MemoryCopy(r) => assert_eq!(r.memcpy_type.to_string(), "H2D"),
            other => panic!("unexpected {other:?}"),
        }
        match operations[2] {
            DeviceOperation::MemoryFill(r) => {
                assert_eq!((r.bytes, r.pattern_size, r.value_for_set), (256, 4, 0xff));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn driver_errors_are_surfaced_not_retried() {
        let (_context, collector, sink) = setup();
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        collector.append_kernel(0x10, KERNEL, None).unwrap();
        collector.driver().fail_next_query(-3);

        assert!(matches!(
            collector.process_completions(),
            Err(ViewError::Driver(DriverError { code: -3, .. }))
        ));
        assert_eq!(collector.in_flight(), 0);
        assert_eq!(collector.stats().lost, 1);
        assert!(sink.kernels().is_empty());
    }

    #[test]
    fn host_synchronize_emits_sync_record() {
        let (_context, collector, sink) = setup();
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        collector.append_kernel(0x10, KERNEL, Some(0xe3)).unwrap();

        let call = collector.api_call(LevelZeroApi::ZeEventHostSynchronize);
        collector
            .host_synchronized(&call, SyncType::HostEvent, 0xe3, 0)
            .unwrap();
        call.finish(0);

        let syncs = sink.synchronizations();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0].sync_type(), SyncType::HostEvent);
        assert_eq!(syncs[0].event_handle, 0xe3);
        assert_eq!(sink.kernels().len(), 1);
    }

    #[test]
    fn uninterested_appends_are_not_tracked() {
        let context = Arc::new(ViewContext::new());
        let collector = LevelZeroCollector::new(context, MockLevelZeroDriver::new());
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        assert_eq!(collector.append_kernel(0x10, KERNEL, None).unwrap(), None);
        assert_eq!(collector.in_flight(), 0);
        assert!(collector.driver().created_events().is_empty());
    }

    #[test]
    fn subscribe_is_idempotent() {
        let (_context, collector, _sink) = setup();
        collector.subscribe().unwrap();
        collector.subscribe().unwrap();
        assert_eq!(collector.driver().tracing_enabled(), 1);
    }

    #[test]
    fn destroyed_list_releases_owned_events() {
        let (_context, collector, sink) = setup();
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        let event = collector.append_kernel(0x10, KERNEL, None).unwrap().unwrap();
        collector.driver().hold(event);

        collector.command_list_destroyed(0x10);
        assert_eq!(collector.driver().destroyed_events(), vec![event]);
        assert_eq!(collector.in_flight(), 0);
        assert_eq!(collector.stats().lost, 1);
        assert!(sink.kernels().is_empty());
    }

    #[test]
    fn reset_list_releases_owned_events() {
        let (_context, collector, _sink) = setup();
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        let first = collector.append_kernel(0x10, KERNEL, None).unwrap().unwrap();
        let second = collector.append_kernel(0x10, KERNEL, None).unwrap().unwrap();
        collector.driver().hold(first);
        collector.driver().hold(second);

        collector.command_list_reset(0x10);
        let mut destroyed = collector.driver().destroyed_events();
        destroyed.sort_unstable();
        assert_eq!(destroyed, vec![first, second]);
        assert_eq!(collector.in_flight(), 0);
    }
}
