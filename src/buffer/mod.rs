// Copyright 2024-2025 Irreducible Inc.

mod queue;
mod view_buffer;

pub use queue::{Backpressure, ViewBufferQueue};
pub use view_buffer::{CompletedBuffer, ViewBuffer};
