// Copyright 2024-2025 Irreducible Inc.

//! Backend collectors translating intercepted runtime and driver calls into records.
//!
//! The interception layer of a backend (driver tracer callbacks, XPTI subscribers, ...) calls
//! into a collector from its prologue and epilogue hooks. Vendor objects are seen only through
//! the narrow driver traits defined per backend, which tests replace with mocks.

mod arena;
#[cfg(feature = "level_zero")]
pub mod level_zero;
#[cfg(feature = "opencl")]
pub mod opencl;
#[cfg(feature = "sycl")]
pub mod sycl;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub use arena::{ArenaKey, HandleArena};
#[cfg(feature = "level_zero")]
pub use level_zero::{LevelZeroApi, LevelZeroCollector, LevelZeroDriver};
#[cfg(feature = "opencl")]
pub use opencl::{OpenClApi, OpenClCollector, OpenClDriver};
#[cfg(feature = "sycl")]
pub use sycl::{SyclApi, SyclCollector};

use crate::context::{Interest, ViewContext};
use crate::correlation::ApiLayer;
use crate::errors::{DriverError, ViewError};
use crate::record::{
    ApiCallRecord, ApiGroup, DeviceSyncRecord, OverheadRecord, SyncType, ViewKind, ViewKindSet,
};
use crate::utils::{process_id, thread_id};

/// A backend attached to a [`ViewHandler`](crate::ViewHandler).
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Record kinds this backend can produce.
    fn supported_kinds(&self) -> ViewKindSet;

    /// Hooks the backend into its runtime. Called on the first enable of a supported kind;
    /// later calls are no-ops. Disabling kinds does not undo it.
    fn subscribe(&self) -> Result<(), ViewError>;

    /// Turns every device operation whose completion is already available into records.
    fn flush(&self) -> Result<(), ViewError>;

    fn counts(&self) -> CollectorCounts {
        CollectorCounts::default()
    }
}

/// One-time subscription guard shared by the collectors.
#[derive(Debug, Default)]
pub(crate) struct Subscription(AtomicBool);

impl Subscription {
    pub(crate) fn subscribe(
        &self,
        name: &'static str,
        install: impl FnOnce() -> Result<(), DriverError>,
    ) -> Result<(), ViewError> {
        if self.0.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = install() {
            self.0.store(false, Ordering::Release);
            tracing::warn!("{name}: failed to subscribe: {e}");
            return Err(e.into());
        }
        tracing::debug!("{name}: subscribed");
        Ok(())
    }
}

/// Counters kept by every collector.
#[derive(Debug, Default)]
pub struct CollectorStats {
    completed: AtomicU64,
    lost: AtomicU64,
    non_monotonic: AtomicU64,
}

/// Point-in-time copy of [`CollectorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorCounts {
    /// Device operations turned into records.
    pub completed: u64,
    /// Device operations whose completion could not be read.
    pub lost: u64,
    /// Records whose timestamps were not ordered append <= submit <= start <= end.
    pub non_monotonic: u64,
}

impl CollectorStats {
    pub(crate) fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts and reports timestamp sequences that go backwards.
    pub(crate) fn check_monotonic(&self, name: &str, correlation_id: u64, stamps: [u64; 4]) {
        if stamps.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        self.non_monotonic.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            correlation_id,
            "{name}: non-monotonic timestamps append={} submit={} start={} end={}",
            stamps[0],
            stamps[1],
            stamps[2],
            stamps[3]
        );
    }

    pub fn counts(&self) -> CollectorCounts {
        CollectorCounts {
            completed: self.completed.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            non_monotonic: self.non_monotonic.load(Ordering::Relaxed),
        }
    }
}

/// Defines the enum of intercepted functions of one API group.
macro_rules! api_ids {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident = $id:literal => $fn_name:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant = $id,)*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            pub fn from_id(id: u32) -> Option<Self> {
                match id {
                    $($id => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub fn id(self) -> u32 {
                self as u32
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $fn_name,)*
                }
            }
        }
    };
}

pub(crate) use api_ids;

/// An intercepted API call between its prologue and epilogue.
///
/// Entering opens an API scope on the calling thread, so device operations created inside the
/// call share its correlation id. The record is written by [`finish`](Self::finish); a call
/// dropped without finishing only closes its scope. Bound to the thread that entered it.
pub struct ApiCall<'a> {
    context: &'a ViewContext,
    kind: ViewKind,
    group: ApiGroup,
    api_id: u32,
    correlation_id: u64,
    start_timestamp: u64,
    interest: Interest,
    open: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ApiCall<'a> {
    pub(crate) fn enter(
        context: &'a ViewContext,
        layer: ApiLayer,
        group: ApiGroup,
        api_id: u32,
    ) -> Self {
        let kind = match layer {
            ApiLayer::Runtime => ViewKind::RuntimeApiCall,
            ApiLayer::Driver => ViewKind::DriverApiCall,
        };
        let interest = if context.api_filter().allows(group, api_id) {
            context.interest(kind)
        } else {
            Interest::none()
        };
        let correlation_id = context.enter_api(layer);

        Self {
            context,
            kind,
            group,
            api_id,
            correlation_id,
            start_timestamp: context.timestamp(),
            interest,
            open: true,
            _not_send: PhantomData,
        }
    }

    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    pub fn start_timestamp(&self) -> u64 {
        self.start_timestamp
    }

    pub fn group(&self) -> ApiGroup {
        self.group
    }

    pub fn api_id(&self) -> u32 {
        self.api_id
    }

    /// Closes the call and emits its record with the function's return code.
    pub fn finish(mut self, return_code: i32) {
        let end_timestamp = self.context.timestamp();
        self.close();

        if self.interest.is_empty() {
            return;
        }
        let record = ApiCallRecord {
            correlation_id: self.correlation_id,
            process_id: process_id(),
            thread_id: thread_id(),
            api_group: self.group as u32,
            api_id: self.api_id,
            return_code,
            start_timestamp: self.start_timestamp,
            end_timestamp,
            ..ApiCallRecord::new(self.kind)
        };
        self.interest.api_call(&record);
    }

    /// Emits a device synchronization record for a host wait performed by this call.
    pub(crate) fn synchronized(&self, sync_type: SyncType, target: SyncTarget, return_code: i32) {
        let interest = self.context.interest(ViewKind::DeviceSynchronization);
        if interest.is_empty() {
            return;
        }
        let record = DeviceSyncRecord {
            correlation_id: self.correlation_id,
            process_id: process_id(),
            thread_id: thread_id(),
            api_group: self.group as u32,
            api_id: self.api_id,
            return_code,
            event_handle: target.event,
            queue_handle: target.queue,
            context_handle: target.context,
            device_uuid: target.device_uuid,
            start_timestamp: self.start_timestamp,
            end_timestamp: self.context.timestamp(),
            ..DeviceSyncRecord::new(sync_type)
        };
        interest.synchronization(&record);
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) && !self.context.exit_api(self.correlation_id) {
            tracing::warn!(
                correlation_id = self.correlation_id,
                "api scope was already closed"
            );
        }
    }
}

impl Drop for ApiCall<'_> {
    fn drop(&mut self) {
        if self.open {
            tracing::trace!(
                correlation_id = self.correlation_id,
                "api call dropped without a result"
            );
            self.close();
        }
    }
}

/// Driver objects a host synchronization waited on. Zero where not applicable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncTarget {
    pub event: u64,
    pub queue: u64,
    pub context: u64,
    pub device_uuid: crate::record::DeviceUuid,
}

/// Measures the time a collector spends on its own bookkeeping inside an intercepted call.
pub(crate) struct OverheadScope<'a> {
    context: &'a ViewContext,
    interest: Interest,
    group: ApiGroup,
    api_id: u32,
    start_timestamp: u64,
}

impl<'a> OverheadScope<'a> {
    pub(crate) fn new(context: &'a ViewContext, group: ApiGroup, api_id: u32) -> Self {
        let interest = context.interest(ViewKind::CollectionOverhead);
        let start_timestamp = if interest.is_empty() {
            0
        } else {
            context.timestamp()
        };
        Self {
            context,
            interest,
            group,
            api_id,
            start_timestamp,
        }
    }
}

impl Drop for OverheadScope<'_> {
    fn drop(&mut self) {
        if self.interest.is_empty() {
            return;
        }
        let end_timestamp = self.context.timestamp();
        let record = OverheadRecord {
            process_id: process_id(),
            thread_id: thread_id(),
            api_group: self.group as u32,
            api_id: self.api_id,
            count: 1,
            duration_ns: end_timestamp.saturating_sub(self.start_timestamp),
            start_timestamp: self.start_timestamp,
            end_timestamp,
            ..OverheadRecord::new()
        };
        self.interest.overhead(&record);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::record::ViewRecord;

    api_ids! {
        enum TestApi {
            First = 1 => "first",
            Second = 7 => "second",
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<ApiCallRecord>>,
        overhead: Mutex<Vec<OverheadRecord>>,
    }

    impl crate::EventSink for Recorder {
        fn wants(&self, kind: ViewKind) -> bool {
            kind != ViewKind::ExternalCorrelation
        }

        fn on_api_call(&self, call: &ApiCallRecord) {
            self.calls.lock().unwrap().push(*call);
        }

        fn on_overhead(&self, overhead: &OverheadRecord) {
            self.overhead.lock().unwrap().push(*overhead);
        }
    }

    #[test]
    fn api_ids_lookup() {
        assert_eq!(TestApi::from_id(7), Some(TestApi::Second));
        assert_eq!(TestApi::from_id(2), None);
        assert_eq!(TestApi::First.name(), "first");
        assert_eq!(TestApi::ALL.len(), 2);
    }

    #[test]
    fn nested_calls_share_correlation() {
        let context = ViewContext::new();
        let recorder = Arc::new(Recorder::default());
        context.sinks().add_internal(recorder.clone());

        let runtime = ApiCall::enter(&context, ApiLayer::Runtime, ApiGroup::Sycl, 1);
        let driver = ApiCall::enter(&context, ApiLayer::Driver, ApiGroup::LevelZero, 2);
        assert_eq!(runtime.correlation_id(), driver.correlation_id());
        driver.finish(0);
        runtime.finish(-5);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].kind(), ViewKind::DriverApiCall);
        assert_eq!(calls[1].kind(), ViewKind::RuntimeApiCall);
        assert_eq!(calls[1].return_code, -5);
        assert!(calls[1].start_timestamp <= calls[0].start_timestamp);
        assert!(calls[0].end_timestamp <= calls[1].end_timestamp);
    }

    #[test]
    fn filtered_calls_still_open_scopes() {
        let context = ViewContext::new();
        let recorder = Arc::new(Recorder::default());
        context.sinks().add_internal(recorder.clone());
        context.api_filter().disable(ApiGroup::LevelZero, 3);

        let call = ApiCall::enter(&context, ApiLayer::Driver, ApiGroup::LevelZero, 3);
        assert_eq!(context.claim_correlation_id(), call.correlation_id());
        call.finish(0);

        let dropped = ApiCall::enter(&context, ApiLayer::Driver, ApiGroup::LevelZero, 4);
        drop(dropped);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn overhead_scope_reports_duration() {
        let context = ViewContext::new();
        let recorder = Arc::new(Recorder::default());
        context.sinks().add_internal(recorder.clone());
        context.set_timestamp_callback(Some(Arc::new({
            let now = std::sync::atomic::AtomicU64::new(100);
            move || now.fetch_add(50, Ordering::Relaxed)
        })));

        drop(OverheadScope::new(&context, ApiGroup::OpenCl, 9));

        let overhead = recorder.overhead.lock().unwrap();
        assert_eq!(overhead.len(), 1);
        assert_eq!(overhead[0].duration_ns, 50);
        assert_eq!(overhead[0].api_id, 9);
        assert_eq!(overhead[0].count, 1);
    }
}
