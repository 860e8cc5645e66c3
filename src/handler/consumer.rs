// Copyright 2024-2025 Irreducible Inc.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::buffer::ViewBuffer;

use super::{CallbackGuard, HandlerCore};

/// Starts the thread that hands filled buffers to the client. It exits once the queue is
/// closed and drained.
pub(crate) fn spawn(core: Arc<HandlerCore>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("gpu-view-consumer".into())
        .spawn(move || {
            while let Some(buffer) = core.queue.pop() {
                deliver(&core, buffer);
                core.queue.done();
            }
            tracing::trace!("buffer queue closed");
        })
        .expect("failed to spawn the buffer consumer thread")
}

fn deliver(core: &HandlerCore, buffer: ViewBuffer) {
    let Some(completed) = buffer.into_completed() else {
        return;
    };
    let Some(callbacks) = core.callbacks() else {
        tracing::warn!(
            bytes = completed.valid_bytes(),
            "no buffer completed callback, buffer dropped"
        );
        core.counters.buffers_dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    tracing::trace!(bytes = completed.valid_bytes(), "delivering buffer");
    let _guard = CallbackGuard::enter();
    // a panicking client must not take the consumer down with it, or every flush would hang
    match panic::catch_unwind(AssertUnwindSafe(|| (callbacks.complete)(completed))) {
        Ok(()) => {
            core.counters
                .buffers_delivered
                .fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => tracing::error!("buffer completed callback panicked"),
    }
}
