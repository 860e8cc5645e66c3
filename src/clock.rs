// Copyright 2024-2025 Irreducible Inc.

use std::sync::{Arc, RwLock};

use cfg_if::cfg_if;
use nix::sys::time::TimeValLike;
use nix::time::{clock_gettime, ClockId};

cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const HOST_CLOCK: ClockId = ClockId::CLOCK_MONOTONIC_RAW;
    } else {
        const HOST_CLOCK: ClockId = ClockId::CLOCK_MONOTONIC;
    }
}

/// Host timestamp in nanoseconds on the raw monotonic clock.
pub fn host_timestamp() -> u64 {
    clock_gettime(HOST_CLOCK)
        .expect("failed to get system time")
        .num_nanoseconds() as u64
}

pub type TimestampFn = dyn Fn() -> u64 + Send + Sync;

/// Source of every host timestamp written into records.
#[derive(Default)]
pub struct Clock {
    source: RwLock<Option<Arc<TimestampFn>>>,
}

impl Clock {
    pub fn now(&self) -> u64 {
        let source = self
            .source
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match source {
            Some(source) => source(),
            None => host_timestamp(),
        }
    }

    /// Replaces the host clock, e.g. to align records with an application time base.
    /// `None` restores the default clock.
    pub fn set_source(&self, source: Option<Arc<TimestampFn>>) {
        *self.source.write().unwrap_or_else(|e| e.into_inner()) = source;
    }
}

/// Maps device timestamp ticks onto the host time base.
///
/// The mapping is anchored at a point where the host and device clocks were sampled
/// together. Device counters only keep `valid_bits` bits and wrap around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceTimer {
    pub host_sync_ns: u64,
    pub device_sync_ticks: u64,
    pub ns_per_tick: f64,
    pub valid_bits: u32,
}

impl DeviceTimer {
    /// A device whose counter is the host clock itself.
    pub fn host_aligned(host_sync_ns: u64) -> Self {
        Self {
            host_sync_ns,
            device_sync_ticks: host_sync_ns,
            ns_per_tick: 1.0,
            valid_bits: 64,
        }
    }

    fn mask(&self) -> u64 {
        if self.valid_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.valid_bits) - 1
        }
    }

    fn ticks_to_ns(&self, ticks: u64) -> u64 {
        (ticks as f64 * self.ns_per_tick) as u64
    }

    /// Ticks elapsed from `start` to `end`, accounting for one counter wrap.
    pub fn elapsed_ticks(&self, start: u64, end: u64) -> u64 {
        let mask = self.mask();
        end.wrapping_sub(start) & mask
    }

    /// Converts a device tick value into host nanoseconds.
    ///
    /// Ticks within half a counter period before the sync point map below `host_sync_ns`;
    /// the result is clamped to the `u64` range.
    pub fn to_host_ns(&self, ticks: u64) -> u64 {
        let period = self.mask() as i128 + 1;
        let mut offset =
            self.elapsed_ticks(self.device_sync_ticks & self.mask(), ticks & self.mask()) as i128;
        if offset >= period / 2 {
            offset -= period;
        }
        let offset_ns = (offset as f64 * self.ns_per_tick) as i128;
        (self.host_sync_ns as i128 + offset_ns).clamp(0, u64::MAX as i128) as u64
    }

    /// Host start and end of a device interval. The end is derived from the start and the
    /// wrapped duration so a wrap inside the interval does not make it negative.
    pub fn to_host_interval(&self, start_ticks: u64, end_ticks: u64) -> (u64, u64) {
        let start = self.to_host_ns(start_ticks);
        let duration = self.ticks_to_ns(self.elapsed_ticks(start_ticks, end_ticks));
        (start, start.saturating_add(duration))
    }
}
