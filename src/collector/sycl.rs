// Copyright 2024-2025 Irreducible Inc.

//! SYCL runtime collector, fed by the XPTI trace points of the runtime.
//!
//! SYCL itself never talks to the device: it launches work through the Level Zero backend on
//! the same thread. The collector records runtime calls and publishes the task being launched
//! as thread-local launch info, which the Level Zero collector copies into its kernel records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::{RuntimeLaunch, ViewContext};
use crate::correlation::ApiLayer;
use crate::errors::ViewError;
use crate::record::{ApiGroup, SymbolId, SyncType, ViewKindSet};
use crate::view_kinds;

use super::{api_ids, ApiCall, Collector, Subscription, SyncTarget};

api_ids! {
    /// Traced SYCL runtime functions.
    pub enum SyclApi {
        QueueSubmit = 1 => "sycl::queue::submit",
        QueueParallelFor = 2 => "sycl::queue::parallel_for",
        QueueSingleTask = 3 => "sycl::queue::single_task",
        QueueMemcpy = 4 => "sycl::queue::memcpy",
        QueueMemset = 5 => "sycl::queue::memset",
        QueueFill = 6 => "sycl::queue::fill",
        QueueWait = 7 => "sycl::queue::wait",
        QueueWaitAndThrow = 8 => "sycl::queue::wait_and_throw",
        EventWait = 9 => "sycl::event::wait",
        MallocDevice = 10 => "sycl::malloc_device",
        MallocHost = 11 => "sycl::malloc_host",
        MallocShared = 12 => "sycl::malloc_shared",
        Free = 13 => "sycl::free",
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    name: SymbolId,
    source_file: SymbolId,
    source_line: u32,
}

/// Collector for the SYCL runtime layer.
pub struct SyclCollector {
    context: Arc<ViewContext>,
    nodes: Mutex<HashMap<u64, Node>>,
    subscription: Subscription,
}

impl SyclCollector {
    pub fn new(context: Arc<ViewContext>) -> Self {
        Self {
            context,
            nodes: Mutex::default(),
            subscription: Subscription::default(),
        }
    }

    fn nodes(&self) -> MutexGuard<'_, HashMap<u64, Node>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `function_begin` trace point. Driver calls made before the returned call is finished
    /// share its correlation id.
    pub fn function_begin(&self, api: SyclApi) -> ApiCall<'_> {
        ApiCall::enter(&self.context, ApiLayer::Runtime, ApiGroup::Sycl, api.id())
    }

    /// `node_create` trace point: a command group node and the kernel it runs.
    pub fn node_created(
        &self,
        node_id: u64,
        kernel_name: Option<&str>,
        source_file: Option<&str>,
        source_line: u32,
    ) {
        let node = Node {
            name: kernel_name.map_or(SymbolId::NONE, |n| self.context.intern(n)),
            source_file: source_file.map_or(SymbolId::NONE, |f| self.context.intern(f)),
            source_line,
        };
        self.nodes().insert(node_id, node);
    }

    /// `task_begin` trace point: an instance of the node starts being launched on this thread.
    pub fn task_begin(&self, node_id: u64, invocation_id: u64, queue_id: u64) {
        let node = self.nodes().get(&node_id).copied();
        if node.is_none() {
            tracing::debug!(node_id, "task of an unknown node");
        }
        self.context.set_runtime_launch(Some(RuntimeLaunch {
            node_id,
            invocation_id,
            queue_id,
            task_begin_timestamp: self.context.timestamp(),
            enqueue_begin_timestamp: 0,
            name: node.map_or(SymbolId::NONE, |n| n.name),
            source_file: node.map_or(SymbolId::NONE, |n| n.source_file),
            source_line: node.map_or(0, |n| n.source_line),
        }));
    }

    /// The runtime starts enqueueing the current task to the backend.
    pub fn enqueue_begin(&self) {
        let timestamp = self.context.timestamp();
        if !self
            .context
            .update_runtime_launch(|launch| launch.enqueue_begin_timestamp = timestamp)
        {
            tracing::debug!("enqueue outside of a task");
        }
    }

    /// `task_end` trace point.
    pub fn task_end(&self) {
        self.context.set_runtime_launch(None);
    }

    /// Epilogue of `queue::wait` and `event::wait`.
    pub fn waited(&self, call: &ApiCall<'_>, queue_id: u64, return_code: i32) {
        let target = SyncTarget {
            queue: queue_id,
            ..Default::default()
        };
        call.synchronized(SyncType::RuntimeQueue, target, return_code);
    }
}

impl Collector for SyclCollector {
    fn name(&self) -> &'static str {
        "sycl"
    }

    fn supported_kinds(&self) -> ViewKindSet {
        view_kinds![RuntimeApiCall, DeviceSynchronization]
    }

    fn subscribe(&self) -> Result<(), ViewError> {
        // the runtime picks up the XPTI subscriber on its own
        self.subscription.subscribe(self.name(), || Ok(()))
    }

    fn flush(&self) -> Result<(), ViewError> {
        Ok(())
    }
}
