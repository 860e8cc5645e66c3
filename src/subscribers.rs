// Copyright 2024-2025 Irreducible Inc.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Opaque handle returned for an external subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberHandle(u64);

struct Entry<T: ?Sized> {
    // internal subscribers have no handle and live as long as the collection
    handle: Option<SubscriberHandle>,
    subscriber: Arc<T>,
}

impl<T: ?Sized> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            subscriber: self.subscriber.clone(),
        }
    }
}

/// Thread-safe registry of event consumers.
///
/// Updates replace the list behind an `Arc`, so an iteration works on the snapshot taken
/// when it started: it never observes a torn list, and subscribers added or removed while
/// it runs may or may not be visited.
pub struct SubscribersCollection<T: ?Sized> {
    entries: RwLock<Arc<Vec<Entry<T>>>>,
    next_handle: AtomicU64,
}

impl<T: ?Sized> SubscribersCollection<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_handle: AtomicU64::new(1),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Vec<Entry<T>>)) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut updated = entries.as_ref().clone();
        f(&mut updated);
        *entries = Arc::new(updated);
    }

    pub fn add_external(&self, subscriber: Arc<T>) -> SubscriberHandle {
        let handle = SubscriberHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.update(|entries| {
            entries.push(Entry {
                handle: Some(handle),
                subscriber,
            })
        });
        handle
    }

    /// Returns `false` if the handle is unknown or was already removed.
    pub fn remove_external(&self, handle: SubscriberHandle) -> bool {
        let mut removed = false;
        self.update(|entries| {
            if let Some(position) = entries.iter().position(|e| e.handle == Some(handle)) {
                entries.remove(position);
                removed = true;
            }
        });
        removed
    }

    pub fn add_internal(&self, subscriber: Arc<T>) {
        self.update(|entries| {
            entries.push(Entry {
                handle: None,
                subscriber,
            })
        });
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    fn current(&self) -> Arc<Vec<Entry<T>>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Subscribers registered at the time of the call, in registration order.
    pub fn snapshot(&self) -> Snapshot<T> {
        Snapshot {
            entries: self.current(),
        }
    }
}

impl<T: ?Sized> Default for SubscribersCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Snapshot<T: ?Sized> {
    entries: Arc<Vec<Entry<T>>>,
}

impl<T: ?Sized> Snapshot<T> {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.iter().map(|e| &e.subscriber)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
