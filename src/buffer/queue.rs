// Copyright 2024-2025 Irreducible Inc.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::ViewBuffer;

/// What a bounded queue does when a producer pushes into a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// The producer waits until the consumer made room.
    #[default]
    Block,
    /// The oldest queued buffer is evicted and returned to the producer.
    DropOldest,
}

impl FromStr for Backpressure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(Backpressure::Block),
            "drop-oldest" | "drop_oldest" => Ok(Backpressure::DropOldest),
            other => Err(format!("unknown backpressure policy '{other}'")),
        }
    }
}

impl fmt::Display for Backpressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backpressure::Block => write!(f, "block"),
            Backpressure::DropOldest => write!(f, "drop-oldest"),
        }
    }
}

#[derive(Default)]
struct State {
    buffers: VecDeque<ViewBuffer>,
    /// Popped but not yet reported back through `done`.
    in_delivery: usize,
    closed: bool,
}

/// FIFO hand-off of filled buffers from producers to the consumer thread.
///
/// Ordering among several threads blocked in `pop` (or in a blocking `push`) is whatever
/// the condition variable wake-up order gives; only the queue content itself is FIFO.
pub struct ViewBufferQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    drained: Condvar,
    capacity: Option<NonZeroUsize>,
    policy: Backpressure,
}

impl ViewBufferQueue {
    pub fn unbounded() -> Self {
        Self::new(None, Backpressure::Block)
    }

    pub fn new(capacity: Option<NonZeroUsize>, policy: Backpressure) -> Self {
        Self {
            state: Mutex::default(),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            drained: Condvar::new(),
            capacity,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a panicking client callback must not wedge every producer
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_full(&self, state: &State) -> bool {
        self.capacity
            .is_some_and(|capacity| state.buffers.len() >= capacity.get())
    }

    /// Appends a buffer at the tail.
    ///
    /// With [`Backpressure::DropOldest`] a full queue evicts its head, which is returned.
    /// With [`Backpressure::Block`] the call waits for room. If the queue is closed while
    /// still full, the buffer is handed back instead.
    pub fn push(&self, buffer: ViewBuffer) -> Option<ViewBuffer> {
        let mut state = self.lock();
        let mut evicted = None;

        if self.is_full(&state) {
            match self.policy {
                Backpressure::Block => {
                    while self.is_full(&state) && !state.closed {
                        state = self
                            .not_full
                            .wait(state)
                            .unwrap_or_else(|e| e.into_inner());
                    }
                    if self.is_full(&state) {
                        return Some(buffer);
                    }
                }
                Backpressure::DropOldest => {
                    evicted = state.buffers.pop_front();
                }
            }
        }

        state.buffers.push_back(buffer);
        drop(state);
        self.not_empty.notify_one();

        evicted
    }

    /// Takes the head buffer, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and empty. A returned buffer counts as
    /// being delivered until [`done`](Self::done) is called.
    pub fn pop(&self) -> Option<ViewBuffer> {
        let mut state = self.lock();
        loop {
            if let Some(buffer) = state.buffers.pop_front() {
                state.in_delivery += 1;
                drop(state);
                self.not_full.notify_one();
                return Some(buffer);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Non-blocking variant of [`pop`](Self::pop).
    pub fn try_pop(&self) -> Option<ViewBuffer> {
        let mut state = self.lock();
        let buffer = state.buffers.pop_front()?;
        state.in_delivery += 1;
        drop(state);
        self.not_full.notify_one();
        Some(buffer)
    }

    /// Reports that a popped buffer reached the client.
    pub fn done(&self) {
        let mut state = self.lock();
        assert!(state.in_delivery > 0, "done() without a matching pop()");
        state.in_delivery -= 1;
        if state.in_delivery == 0 && state.buffers.is_empty() {
            self.drained.notify_all();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buffers.is_empty()
    }

    /// Wakes all waiters; `pop` returns `None` once the remaining buffers are taken.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.drained.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Blocks until nothing is queued or in delivery, or until `stop` is set.
    ///
    /// `stop` is an external flag without its own wake-up, so it is re-checked every `poll`.
    /// Returns `true` when the queue drained.
    pub fn wait_until_empty_or(&self, stop: &AtomicBool, poll: Duration) -> bool {
        let mut state = self.lock();
        loop {
            if state.buffers.is_empty() && state.in_delivery == 0 {
                return true;
            }
            if stop.load(Ordering::Acquire) {
                return false;
            }
            state = self
                .drained
                .wait_timeout(state, poll)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }
}

impl Default for ViewBufferQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn tagged(tag: u8) -> ViewBuffer {
        ViewBuffer::new(vec![tag; 8].into_boxed_slice())
    }

    fn tag_of(buffer: &ViewBuffer) -> u8 {
        buffer.buffer().unwrap()[0]
    }

    #[test]
    fn fifo_and_len() {
        let queue = ViewBufferQueue::unbounded();
        for tag in 0..5 {
            assert!(queue.push(tagged(tag)).is_none());
        }
        assert_eq!(queue.len(), 5);

        for tag in 0..3 {
            assert_eq!(tag_of(&queue.pop().unwrap()), tag);
            queue.done();
        }
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drop_oldest_evicts_head() {
        let queue = ViewBufferQueue::new(NonZeroUsize::new(2), Backpressure::DropOldest);
        assert!(queue.push(tagged(1)).is_none());
        assert!(queue.push(tagged(2)).is_none());

        let evicted = queue.push(tagged(3)).unwrap();
        assert_eq!(tag_of(&evicted), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(tag_of(&queue.pop().unwrap()), 2);
        assert_eq!(tag_of(&queue.pop().unwrap()), 3);
    }

    #[test]
    fn blocking_push_waits_for_consumer() {
        let queue = Arc::new(ViewBufferQueue::new(
            NonZeroUsize::new(1),
            Backpressure::Block,
        ));
        queue.push(tagged(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(tagged(2)))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 1);
        assert_eq!(tag_of(&queue.pop().unwrap()), 1);
        assert!(producer.join().unwrap().is_none());
        assert_eq!(tag_of(&queue.pop().unwrap()), 2);
    }

    #[test]
    fn close_releases_poppers() {
        let queue = Arc::new(ViewBufferQueue::unbounded());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop().is_none())
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn closed_full_queue_hands_buffer_back() {
        let queue = Arc::new(ViewBufferQueue::new(
            NonZeroUsize::new(1),
            Backpressure::Block,
        ));
        assert!(queue.push(tagged(1)).is_none());

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(tagged(2)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        let rejected = producer.join().unwrap().unwrap();
        assert_eq!(tag_of(&rejected), 2);
        assert_eq!(queue.len(), 1);

        // closed without waiting
        let rejected = queue.push(tagged(3)).unwrap();
        assert_eq!(tag_of(&rejected), 3);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn closed_queue_still_hands_out_remaining_buffers() {
        let queue = ViewBufferQueue::unbounded();
        queue.push(tagged(9));
        queue.close();
        assert_eq!(tag_of(&queue.pop().unwrap()), 9);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn wait_covers_buffers_in_delivery() {
        let queue = Arc::new(ViewBufferQueue::unbounded());
        let stop = AtomicBool::new(false);
        for tag in 0..4 {
            queue.push(tagged(tag));
        }

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                while let Some(_buffer) = queue.pop() {
                    thread::sleep(Duration::from_millis(5));
                    queue.done();
                }
            })
        };

        assert!(queue.wait_until_empty_or(&stop, Duration::from_millis(1)));
        assert!(queue.is_empty());
        queue.close();
        consumer.join().unwrap();
    }

    #[test]
    fn wait_gives_up_on_stop() {
        let queue = ViewBufferQueue::unbounded();
        queue.push(tagged(0));
        let stop = AtomicBool::new(true);
        assert!(!queue.wait_until_empty_or(&stop, Duration::from_millis(1)));
        assert_eq!(queue.len(), 1);
    }
}
