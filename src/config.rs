// Copyright 2024-2025 Irreducible Inc.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::buffer::Backpressure;
use crate::env_utils::get_env_var;

/// Lower bound of [`Config::flush_poll`].
pub const MIN_FLUSH_POLL: Duration = Duration::from_millis(1);

/// View handler config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of filled buffers waiting for delivery, `None` for unbounded.
    /// Corresponds to the `GPU_VIEW_QUEUE_CAPACITY` environment variable, where 0 means unbounded.
    pub queue_capacity: Option<NonZeroUsize>,

    /// What producers do when the bounded queue is full.
    /// Corresponds to the `GPU_VIEW_QUEUE_POLICY` environment variable (`block` or `drop-oldest`).
    pub backpressure: Backpressure,

    /// How often a waiting flush re-checks the shutdown flag.
    /// Corresponds to the `GPU_VIEW_FLUSH_POLL_MS` environment variable. Values below
    /// [`MIN_FLUSH_POLL`] are raised to it.
    pub flush_poll: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            queue_capacity: NonZeroUsize::new(get_env_var("GPU_VIEW_QUEUE_CAPACITY", 0)),
            backpressure: get_env_var("GPU_VIEW_QUEUE_POLICY", Backpressure::Block),
            flush_poll: Duration::from_millis(get_env_var("GPU_VIEW_FLUSH_POLL_MS", 10))
                .max(MIN_FLUSH_POLL),
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize, backpressure: Backpressure) -> Self {
        self.queue_capacity = NonZeroUsize::new(capacity);
        self.backpressure = backpressure;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_fork::rusty_fork_test;

    rusty_fork_test! {
        #[test]
        fn reads_environment() {
            std::env::set_var("GPU_VIEW_QUEUE_CAPACITY", "4");
            std::env::set_var("GPU_VIEW_QUEUE_POLICY", "drop-oldest");
            std::env::set_var("GPU_VIEW_FLUSH_POLL_MS", "bogus");

            let config = Config::from_env();
            assert_eq!(config.queue_capacity, NonZeroUsize::new(4));
            assert_eq!(config.backpressure, Backpressure::DropOldest);
            assert_eq!(config.flush_poll, Duration::from_millis(10));
        }

        #[test]
        fn zero_flush_poll_is_raised() {
            std::env::set_var("GPU_VIEW_FLUSH_POLL_MS", "0");
            assert_eq!(Config::from_env().flush_poll, MIN_FLUSH_POLL);
        }

        #[test]
        fn defaults_to_unbounded_blocking_queue() {
            let config = Config::from_env();
            assert_eq!(config.queue_capacity, None);
            assert_eq!(config.backpressure, Backpressure::Block);
        }
    }
}
