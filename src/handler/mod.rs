// Copyright 2024-2025 Irreducible Inc.

//! The view handler: enabled kinds, client buffer callbacks, and delivery of filled buffers.
//!
//! Records are written into per-thread buffers obtained from the client's
//! buffer-requested callback. Filled buffers go through a [`ViewBufferQueue`] to a
//! consumer thread, which passes them to the buffer-completed callback.

mod consumer;
mod writer;

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use crate::buffer::{CompletedBuffer, ViewBuffer, ViewBufferQueue};
use crate::clock::TimestampFn;
use crate::collector::{Collector, CollectorCounts};
use crate::config::{Config, MIN_FLUSH_POLL};
use crate::context::ViewContext;
use crate::correlation::{ExternalId, ExternalKind};
use crate::errors::{err_msg, ViewError};
use crate::record::{
    ApiCallRecord, ApiGroup, DeviceSyncRecord, ExternalCorrelationRecord, OverheadRecord,
    ViewKind, ViewKindSet, ViewRecord,
};
use crate::sink::{DeviceOperation, EventSink};
use crate::subscribers::SubscriberHandle;
use crate::view_kinds;

use writer::RecordWriter;

/// Supplies storage for records. The returned buffer must hold at least
/// [`LARGEST_RECORD_SIZE`](crate::LARGEST_RECORD_SIZE) bytes.
pub type BufferRequestFn = dyn Fn() -> Box<[u8]> + Send + Sync;

/// Receives filled buffers, on the handler's consumer thread.
pub type BufferCompleteFn = dyn Fn(CompletedBuffer) + Send + Sync;

/// Kinds produced by the handler itself, whatever collectors are attached.
const ALWAYS_AVAILABLE: ViewKindSet = view_kinds![ExternalCorrelation, CollectionOverhead];

thread_local! {
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a client buffer callback.
pub(crate) struct CallbackGuard {
    previous: bool,
}

impl CallbackGuard {
    pub(crate) fn enter() -> Self {
        Self {
            previous: IN_CALLBACK.with(|flag| flag.replace(true)),
        }
    }

    fn active() -> bool {
        IN_CALLBACK.with(|flag| flag.get())
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        IN_CALLBACK.with(|flag| flag.set(self.previous));
    }
}

#[derive(Clone)]
pub(crate) struct Callbacks {
    request: Arc<BufferRequestFn>,
    complete: Arc<BufferCompleteFn>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    records_written: AtomicU64,
    records_lost: AtomicU64,
    buffers_requested: AtomicU64,
    buffers_delivered: AtomicU64,
    buffers_dropped: AtomicU64,
}

/// Handler counters, plus the counters of every attached collector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerStats {
    pub records_written: u64,
    /// Records that could not be stored, e.g. because the client supplied a too small buffer.
    pub records_lost: u64,
    pub buffers_requested: u64,
    pub buffers_delivered: u64,
    /// Buffers evicted from a full queue, or filled after the callbacks went away.
    pub buffers_dropped: u64,
    pub collectors: Vec<(&'static str, CollectorCounts)>,
}

/// The part of the handler shared with the consumer thread and registered as a sink.
pub(crate) struct HandlerCore {
    enabled: AtomicU32,
    callbacks: RwLock<Option<Callbacks>>,
    writer: RecordWriter,
    queue: ViewBufferQueue,
    counters: Counters,
    stopping: AtomicBool,
}

impl HandlerCore {
    fn new(config: &Config) -> Self {
        Self {
            enabled: AtomicU32::new(0),
            callbacks: RwLock::new(None),
            writer: RecordWriter::new(),
            queue: ViewBufferQueue::new(config.queue_capacity, config.backpressure),
            counters: Counters::default(),
            stopping: AtomicBool::new(false),
        }
    }

    fn enabled(&self) -> ViewKindSet {
        ViewKindSet::from_bits(self.enabled.load(Ordering::Acquire))
    }

    pub(crate) fn callbacks(&self) -> Option<Callbacks> {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn request_storage(&self) -> Result<Box<[u8]>, ViewError> {
        let callbacks = self.callbacks().ok_or(ViewError::NoCallbacksSet)?;
        let storage = {
            let _guard = CallbackGuard::enter();
            (callbacks.request)()
        };
        self.counters
            .buffers_requested
            .fetch_add(1, Ordering::Relaxed);
        tracing::trace!(capacity = storage.len(), "buffer requested");
        Ok(storage)
    }

    fn enqueue(&self, buffer: ViewBuffer) {
        tracing::trace!(bytes = buffer.valid_bytes(), "buffer queued");
        if let Some(dropped) = self.queue.push(buffer) {
            self.counters.buffers_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                bytes = dropped.valid_bytes(),
                "buffer queue is full, dropped a buffer"
            );
        }
    }

    fn write<T: ViewRecord>(&self, record: &T) {
        let result = self.writer.write(
            record,
            || self.request_storage(),
            |full| self.enqueue(full),
        );
        match result {
            Ok(()) => {
                self.counters.records_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.records_lost.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = ?record.kind(), "record lost: {e}");
            }
        }
    }

    fn flush_buffers(&self) {
        self.writer.drain(|buffer| self.enqueue(buffer));
    }
}

impl EventSink for HandlerCore {
    fn wants(&self, kind: ViewKind) -> bool {
        self.enabled().contains(kind)
    }

    fn on_external_correlation(&self, correlation_id: u64, external: &[ExternalId]) {
        for id in external {
            self.write(&ExternalCorrelationRecord::new(
                correlation_id,
                id.kind,
                id.id,
            ));
        }
    }

    fn on_api_call(&self, call: &ApiCallRecord) {
        self.write(call);
    }

    fn on_device_operation(&self, operation: &DeviceOperation) {
        match operation {
            DeviceOperation::Kernel(r) => self.write(r),
            DeviceOperation::MemoryCopy(r) => self.write(r),
            DeviceOperation::MemoryCopyP2p(r) => self.write(r),
            DeviceOperation::MemoryFill(r) => self.write(r),
        }
    }

    fn on_synchronization(&self, sync: &DeviceSyncRecord) {
        self.write(sync);
    }

    fn on_overhead(&self, overhead: &OverheadRecord) {
        self.write(overhead);
    }
}

/// Entry point of the collection API.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use gpu_view::{ViewHandler, ViewKind};
///
/// let handler = ViewHandler::new();
/// let records = Arc::new(Mutex::new(0));
/// let counter = records.clone();
/// handler
///     .set_buffer_callbacks(
///         || vec![0u8; 4096].into_boxed_slice(),
///         move |buffer| *counter.lock().unwrap() += buffer.records().count(),
///     )
///     .unwrap();
/// // no collector is attached, so device kinds are not available
/// assert!(handler.enable(ViewKind::Kernel).is_err());
/// handler.enable(ViewKind::ExternalCorrelation).unwrap();
/// handler.flush_all().unwrap();
/// ```
pub struct ViewHandler {
    context: Arc<ViewContext>,
    core: Arc<HandlerCore>,
    registration: SubscriberHandle,
    collectors: RwLock<Vec<Arc<dyn Collector>>>,
    config: Config,
    consumer: Option<JoinHandle<()>>,
}

impl ViewHandler {
    /// Creates a handler with its own context, configured from the environment.
    pub fn new() -> Self {
        Self::with_context(Arc::new(ViewContext::new()), Config::from_env())
    }

    pub fn with_context(context: Arc<ViewContext>, config: Config) -> Self {
        let core = Arc::new(HandlerCore::new(&config));
        let registration = context.sinks().add_external(core.clone());
        let consumer = consumer::spawn(core.clone());
        Self {
            context,
            core,
            registration,
            collectors: RwLock::new(Vec::new()),
            config,
            consumer: Some(consumer),
        }
    }

    pub fn context(&self) -> &Arc<ViewContext> {
        &self.context
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers the client buffer callbacks. Both are required.
    pub fn set_callbacks(
        &self,
        request: Option<Arc<BufferRequestFn>>,
        complete: Option<Arc<BufferCompleteFn>>,
    ) -> Result<(), ViewError> {
        let (Some(request), Some(complete)) = (request, complete) else {
            return Err(ViewError::BadArgument("both buffer callbacks are required"));
        };
        *self.core.callbacks.write().unwrap_or_else(|e| e.into_inner()) =
            Some(Callbacks { request, complete });
        tracing::debug!("buffer callbacks set");
        Ok(())
    }

    pub fn set_buffer_callbacks(
        &self,
        request: impl Fn() -> Box<[u8]> + Send + Sync + 'static,
        complete: impl Fn(CompletedBuffer) + Send + Sync + 'static,
    ) -> Result<(), ViewError> {
        self.set_callbacks(Some(Arc::new(request)), Some(Arc::new(complete)))
    }

    fn collectors(&self) -> Vec<Arc<dyn Collector>> {
        self.collectors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Attaches a backend. It is subscribed right away if one of its kinds is enabled.
    pub fn add_collector(&self, collector: Arc<dyn Collector>) -> Result<(), ViewError> {
        let overlap = collector.supported_kinds().bits() & self.core.enabled().bits();
        self.collectors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(collector.clone());
        tracing::debug!(collector = collector.name(), "collector attached");

        if overlap != 0 {
            collector.subscribe()?;
        }
        Ok(())
    }

    fn supported(&self) -> ViewKindSet {
        self.collectors()
            .iter()
            .fold(ALWAYS_AVAILABLE, |set, c| set.union(c.supported_kinds()))
    }

    /// Starts recording `kind`. Enabling an enabled kind succeeds without effect.
    pub fn enable(&self, kind: ViewKind) -> Result<(), ViewError> {
        if kind == ViewKind::Invalid {
            return Err(ViewError::BadArgument("invalid view kind"));
        }
        if self.core.callbacks().is_none() {
            return Err(ViewError::NoCallbacksSet);
        }
        if !self.supported().contains(kind) {
            return Err(ViewError::NotImplemented(kind));
        }
        if self.core.enabled().contains(kind) {
            return Ok(());
        }

        for collector in self.collectors() {
            if collector.supported_kinds().contains(kind) {
                collector.subscribe()?;
            }
        }
        let bit = ViewKindSet::empty().with(kind).bits();
        self.core.enabled.fetch_or(bit, Ordering::AcqRel);
        tracing::debug!(?kind, "view kind enabled");
        Ok(())
    }

    /// Stops recording new events of `kind`. Events already in flight are still delivered.
    pub fn disable(&self, kind: ViewKind) -> Result<(), ViewError> {
        if kind == ViewKind::Invalid {
            return Err(ViewError::BadArgument("invalid view kind"));
        }
        if !self.supported().contains(kind) {
            return Err(ViewError::NotImplemented(kind));
        }

        let bit = ViewKindSet::empty().with(kind).bits();
        self.core.enabled.fetch_and(!bit, Ordering::AcqRel);
        tracing::debug!(?kind, "view kind disabled");
        Ok(())
    }

    pub fn enabled_kinds(&self) -> ViewKindSet {
        self.core.enabled()
    }

    /// Delivers everything recorded so far.
    ///
    /// Collectors turn completed device operations into records, every partially filled
    /// buffer is queued, and the call returns once the completed callback has seen all of
    /// them. Calling it from a buffer callback fails with
    /// [`ViewError::CallbackReentrancy`].
    pub fn flush_all(&self) -> Result<(), ViewError> {
        if CallbackGuard::active() {
            return Err(ViewError::CallbackReentrancy);
        }

        let mut first_error = None;
        for collector in self.collectors() {
            if let Err(e) = collector.flush() {
                tracing::warn!(collector = collector.name(), "flush failed: {e}");
                first_error.get_or_insert(e);
            }
        }

        self.core.flush_buffers();
        let poll = self.config.flush_poll.max(MIN_FLUSH_POLL);
        if !self.core.queue.wait_until_empty_or(&self.core.stopping, poll) {
            tracing::debug!("flush interrupted by shutdown");
        }

        first_error.map_or(Ok(()), Err)
    }

    pub fn push_external_correlation_id(
        &self,
        kind: ExternalKind,
        id: u64,
    ) -> Result<(), ViewError> {
        self.context.push_external_correlation_id(kind, id)
    }

    pub fn pop_external_correlation_id(&self, kind: ExternalKind) -> Result<u64, ViewError> {
        self.context.pop_external_correlation_id(kind)
    }

    /// Adds a client sink next to the handler. Events reach it for the kinds it wants.
    pub fn add_subscriber(&self, sink: Arc<dyn EventSink>) -> SubscriberHandle {
        self.context.sinks().add_external(sink)
    }

    pub fn remove_subscriber(&self, handle: SubscriberHandle) -> bool {
        self.context.sinks().remove_external(handle)
    }

    /// Current time in the timestamp domain of the records.
    pub fn timestamp(&self) -> u64 {
        self.context.timestamp()
    }

    pub fn set_timestamp_callback(&self, callback: Option<Arc<TimestampFn>>) {
        self.context.set_timestamp_callback(callback);
    }

    pub fn enable_api(&self, group: ApiGroup, api_id: u32) {
        self.context.api_filter().enable(group, api_id);
    }

    pub fn disable_api(&self, group: ApiGroup, api_id: u32) {
        self.context.api_filter().disable(group, api_id);
    }

    pub fn stats(&self) -> HandlerStats {
        let counters = &self.core.counters;
        HandlerStats {
            records_written: counters.records_written.load(Ordering::Relaxed),
            records_lost: counters.records_lost.load(Ordering::Relaxed),
            buffers_requested: counters.buffers_requested.load(Ordering::Relaxed),
            buffers_delivered: counters.buffers_delivered.load(Ordering::Relaxed),
            buffers_dropped: counters.buffers_dropped.load(Ordering::Relaxed),
            collectors: self
                .collectors()
                .iter()
                .map(|c| (c.name(), c.counts()))
                .collect(),
        }
    }
}

impl Default for ViewHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ViewHandler {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            tracing::warn!("final flush failed: {e}");
        }
        self.core.enabled.store(0, Ordering::Release);
        self.context.sinks().remove_external(self.registration);

        self.core.stopping.store(true, Ordering::Release);
        self.core.queue.close();
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                err_msg!("buffer consumer thread panicked");
            }
        }
    }
}
