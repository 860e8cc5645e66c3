// Copyright 2024-2025 Irreducible Inc.

//! Process-scoped collection state shared by the handler and the collectors.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::clock::{Clock, TimestampFn};
use crate::correlation::{
    ApiLayer, ApiScopes, Correlation, ExternalId, ExternalKind, ExternalStacks, IdAllocator,
};
use crate::errors::ViewError;
use crate::record::{
    ApiCallRecord, ApiGroup, DeviceSyncRecord, OverheadRecord, SymbolId, ViewKind,
};
use crate::sink::{DeviceOperation, EventSink};
use crate::subscribers::SubscribersCollection;
use crate::symbols::SymbolTable;

static CONTEXT_IDS: IdAllocator = IdAllocator::new();

thread_local! {
    static THREAD_STATE: RefCell<HashMap<u64, ThreadState>> = RefCell::new(HashMap::new());
}

#[derive(Default)]
struct ThreadState {
    external: ExternalStacks,
    scopes: ApiScopes,
    launch: Option<RuntimeLaunch>,
}

/// The runtime task currently being launched on a thread.
///
/// Set by the SYCL collector between task begin and end, and copied into the kernel
/// records the driver layer produces for that task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeLaunch {
    pub node_id: u64,
    pub invocation_id: u64,
    pub queue_id: u64,
    pub task_begin_timestamp: u64,
    pub enqueue_begin_timestamp: u64,
    pub name: SymbolId,
    pub source_file: SymbolId,
    pub source_line: u32,
}

/// Per-function switch for API call records. Everything is enabled by default.
#[derive(Debug, Default)]
pub struct ApiFilter {
    disabled: RwLock<HashSet<(ApiGroup, u32)>>,
}

impl ApiFilter {
    pub fn enable(&self, group: ApiGroup, api_id: u32) {
        self.disabled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(group, api_id));
    }

    pub fn disable(&self, group: ApiGroup, api_id: u32) {
        self.disabled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((group, api_id));
    }

    pub fn allows(&self, group: ApiGroup, api_id: u32) -> bool {
        !self
            .disabled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(group, api_id))
    }
}

/// Sinks that asked for an event when it started.
#[derive(Clone, Default)]
pub struct Interest(Vec<Arc<dyn EventSink>>);

impl Interest {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn api_call(&self, record: &ApiCallRecord) {
        self.0.iter().for_each(|sink| sink.on_api_call(record));
    }

    pub fn device_operation(&self, operation: &DeviceOperation) {
        self.0
            .iter()
            .for_each(|sink| sink.on_device_operation(operation));
    }

    pub fn synchronization(&self, record: &DeviceSyncRecord) {
        self.0.iter().for_each(|sink| sink.on_synchronization(record));
    }

    pub fn overhead(&self, record: &OverheadRecord) {
        self.0.iter().for_each(|sink| sink.on_overhead(record));
    }
}

/// Collection state of one profiling session.
///
/// Counters, the symbol table and the sink registry are shared by all threads. The
/// external correlation stacks, API scopes and runtime launch info are kept per thread
/// and per context, so independent contexts never see each other's state.
pub struct ViewContext {
    id: u64,
    correlation: IdAllocator,
    invocations: IdAllocator,
    symbols: Arc<SymbolTable>,
    clock: Clock,
    api_filter: ApiFilter,
    sinks: SubscribersCollection<dyn EventSink>,
}

impl ViewContext {
    pub fn new() -> Self {
        Self {
            id: CONTEXT_IDS.next(),
            correlation: IdAllocator::new(),
            invocations: IdAllocator::new(),
            symbols: Arc::new(SymbolTable::new()),
            clock: Clock::default(),
            api_filter: ApiFilter::default(),
            sinks: SubscribersCollection::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn with_thread_state<R>(&self, f: impl FnOnce(&mut ThreadState) -> R) -> R {
        THREAD_STATE.with(|states| f(states.borrow_mut().entry(self.id).or_default()))
    }

    pub fn push_external_correlation_id(
        &self,
        kind: ExternalKind,
        id: u64,
    ) -> Result<(), ViewError> {
        self.with_thread_state(|state| state.external.push(kind, id))
    }

    pub fn pop_external_correlation_id(&self, kind: ExternalKind) -> Result<u64, ViewError> {
        self.with_thread_state(|state| state.external.pop(kind))
    }

    pub fn peek_external_correlation_id(&self, kind: ExternalKind) -> Option<u64> {
        self.with_thread_state(|state| state.external.peek(kind))
    }

    pub fn external_snapshot(&self) -> Vec<ExternalId> {
        self.with_thread_state(|state| state.external.snapshot())
    }

    /// Opens an API scope on the calling thread and returns its correlation id.
    pub fn enter_api(&self, layer: ApiLayer) -> u64 {
        let correlation =
            self.with_thread_state(|state| state.scopes.enter(layer, &self.correlation));
        self.announce(correlation);
        correlation.id
    }

    pub fn exit_api(&self, correlation_id: u64) -> bool {
        self.with_thread_state(|state| state.scopes.exit(correlation_id))
    }

    /// Correlation id for a device operation created on the calling thread.
    pub fn claim_correlation_id(&self) -> u64 {
        let correlation = self.with_thread_state(|state| state.scopes.claim(&self.correlation));
        self.announce(correlation);
        correlation.id
    }

    fn announce(&self, correlation: Correlation) {
        if !correlation.fresh {
            return;
        }
        let sinks = self.interest(ViewKind::ExternalCorrelation);
        if sinks.is_empty() {
            return;
        }
        let external = self.external_snapshot();
        if external.is_empty() {
            return;
        }
        for sink in &sinks.0 {
            sink.on_external_correlation(correlation.id, &external);
        }
    }

    /// Identity of one device operation instance, unrelated to driver enqueue counters.
    pub fn next_invocation_id(&self) -> u64 {
        self.invocations.next()
    }

    pub fn set_runtime_launch(&self, launch: Option<RuntimeLaunch>) {
        self.with_thread_state(|state| state.launch = launch);
    }

    pub fn update_runtime_launch(&self, f: impl FnOnce(&mut RuntimeLaunch)) -> bool {
        self.with_thread_state(|state| state.launch.as_mut().map(f).is_some())
    }

    pub fn runtime_launch(&self) -> Option<RuntimeLaunch> {
        self.with_thread_state(|state| state.launch)
    }

    /// Names referenced by [`SymbolId`]s in records. Shared so sinks can resolve names
    /// without keeping the context alive.
    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn intern(&self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    pub fn timestamp(&self) -> u64 {
        self.clock.now()
    }

    pub fn set_timestamp_callback(&self, callback: Option<Arc<TimestampFn>>) {
        self.clock.set_source(callback);
    }

    pub fn api_filter(&self) -> &ApiFilter {
        &self.api_filter
    }

    pub fn sinks(&self) -> &SubscribersCollection<dyn EventSink> {
        &self.sinks
    }

    /// The sinks interested in `kind` right now.
    pub fn interest(&self, kind: ViewKind) -> Interest {
        Interest(
            self.sinks
                .snapshot()
                .iter()
                .filter(|sink| sink.wants(kind))
                .cloned()
                .collect(),
        )
    }
}

impl Default for ViewContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ViewContext {
    fn drop(&mut self) {
        // other threads' entries are released when those threads exit
        let id = self.id;
        let _ = THREAD_STATE.try_with(|states| {
            if let Ok(mut states) = states.try_borrow_mut() {
                states.remove(&id);
            }
        });
    }
}
