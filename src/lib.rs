// Copyright 2024-2025 Irreducible Inc.

//! Collection of GPU activity "view" records from Level Zero, OpenCL and SYCL.
//!
//! # Overview
//! Backend collectors observe intercepted runtime and driver calls and turn them into
//! fixed-layout records: API calls, kernel executions, memory copies and fills, device
//! synchronizations and external correlations. Records are written into client-provided
//! buffers, one buffer per producing thread. Full buffers are handed to a consumer thread
//! which returns them to the client through its completed-buffer callback.
//!
//! The main types:
//!     `ViewHandler`: owns the per-thread buffers, the buffer queue and the consumer thread.
//!     `ViewContext`: shared collection state, correlation ids and event subscribers.
//!     `LevelZeroCollector`, `OpenClCollector`, `SyclCollector`: the backends.
//!     `CsvSink`, `SummarySink`: event subscribers writing rows or printing a summary.
//!     `ExternalCorrelationLayer`: maps `tracing` spans to external correlation ids.
//!
//! ```
//! use gpu_view::{ViewHandler, ViewKind, LARGEST_RECORD_SIZE};
//!
//! let handler = ViewHandler::new();
//! handler.set_buffer_callbacks(
//!     || vec![0u8; 64 * LARGEST_RECORD_SIZE].into_boxed_slice(),
//!     |completed| {
//!         for record in completed.records() {
//!             println!("{:?}", record);
//!         }
//!     },
//! ).unwrap();
//! handler.enable(ViewKind::ExternalCorrelation).unwrap();
//! handler.flush_all().unwrap();
//! ```
//!
//! # Features
//! `level_zero`, `opencl` and `sycl` enable the respective collectors (all on by default,
//! `sycl` implies `level_zero`).
//! The `panic` feature will turn internal error messages into panic!, causing the program to
//! halt on errors.

pub mod buffer;
pub mod clock;
pub mod collector;
pub mod config;
pub mod context;
pub mod correlation;
mod data;
pub mod env_utils;
mod errors;
pub mod handler;
mod layers;
mod macros;
pub mod record;
pub mod sink;
pub mod sinks;
pub mod subscribers;
pub mod symbols;
#[doc(hidden)]
pub mod test_utils;
mod utils;

pub use buffer::{Backpressure, CompletedBuffer, ViewBuffer, ViewBufferQueue};
pub use clock::{host_timestamp, DeviceTimer};
pub use collector::{Collector, CollectorCounts, HandleArena};
#[cfg(feature = "level_zero")]
pub use collector::{LevelZeroApi, LevelZeroCollector, LevelZeroDriver};
#[cfg(feature = "opencl")]
pub use collector::{OpenClApi, OpenClCollector, OpenClDriver};
#[cfg(feature = "sycl")]
pub use collector::{SyclApi, SyclCollector};
pub use config::Config;
pub use context::{RuntimeLaunch, ViewContext};
pub use correlation::{ExternalId, ExternalKind, IdAllocator};
pub use errors::{DriverError, Status, ViewError};
pub use handler::{BufferCompleteFn, BufferRequestFn, HandlerStats, ViewHandler};
pub use layers::external_correlation::ExternalCorrelationLayer;
pub use layers::init_tracing::{init_tracing, init_tracing_with_context, InitError, LOG_ENV_VAR};
pub use record::{
    get_next_record, ApiCallRecord, ApiGroup, DeviceSyncRecord, DeviceUuid,
    ExternalCorrelationRecord, KernelRecord, MemcpyType, MemoryCopyP2pRecord, MemoryCopyRecord,
    MemoryFillRecord, MemoryType, OverheadKind, OverheadRecord, Record, RecordIter, RecordRef,
    SymbolId, SyncType, ViewKind, ViewKindSet, LARGEST_RECORD_SIZE,
};
pub use sink::{DeviceOperation, EventSink};
pub use sinks::{csv::CsvSink, summary::SummarySink};
pub use subscribers::{SubscriberHandle, SubscribersCollection};
pub use symbols::SymbolTable;
