// Copyright 2024-2025 Irreducible Inc.

//! Correlation ids, external correlation stacks and per-thread API scopes.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::ViewError;

/// Hands out process-unique, strictly increasing ids starting at 1.
#[derive(Debug)]
pub struct IdAllocator(AtomicU64);

impl IdAllocator {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Tag selecting one of the independent external correlation stacks.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExternalKind {
    Invalid = 0,
    Unknown = 1,
    Custom0 = 2,
    Custom1 = 3,
    Custom2 = 4,
    Custom3 = 5,
}

impl ExternalKind {
    const VALID: [ExternalKind; 5] = [
        ExternalKind::Unknown,
        ExternalKind::Custom0,
        ExternalKind::Custom1,
        ExternalKind::Custom2,
        ExternalKind::Custom3,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ExternalKind::Invalid),
            1 => Some(ExternalKind::Unknown),
            2 => Some(ExternalKind::Custom0),
            3 => Some(ExternalKind::Custom1),
            4 => Some(ExternalKind::Custom2),
            5 => Some(ExternalKind::Custom3),
            _ => None,
        }
    }

    fn slot(self) -> Result<usize, ViewError> {
        match self {
            ExternalKind::Invalid => Err(ViewError::BadArgument("invalid external kind")),
            kind => Ok(kind as usize - 1),
        }
    }
}

/// The external id visible for one kind at the time a call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalId {
    pub kind: ExternalKind,
    pub id: u64,
}

/// LIFO stacks of user ids, one per [`ExternalKind`]. Lives in thread-local state.
#[derive(Debug, Default)]
pub struct ExternalStacks {
    stacks: [Vec<u64>; 5],
}

impl ExternalStacks {
    pub fn push(&mut self, kind: ExternalKind, id: u64) -> Result<(), ViewError> {
        self.stacks[kind.slot()?].push(id);
        Ok(())
    }

    pub fn pop(&mut self, kind: ExternalKind) -> Result<u64, ViewError> {
        self.stacks[kind.slot()?]
            .pop()
            .ok_or(ViewError::ExternalIdQueueEmpty(kind))
    }

    pub fn peek(&self, kind: ExternalKind) -> Option<u64> {
        kind.slot()
            .ok()
            .and_then(|slot| self.stacks[slot].last().copied())
    }

    /// Top of every non-empty stack. Only the last pushed id of a kind is visible.
    pub fn snapshot(&self) -> Vec<ExternalId> {
        ExternalKind::VALID
            .into_iter()
            .filter_map(|kind| self.peek(kind).map(|id| ExternalId { kind, id }))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.iter().all(Vec::is_empty)
    }
}

/// Which layer of the software stack an intercepted call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiLayer {
    /// SYCL or OpenCL runtime entry points.
    Runtime,
    /// Level Zero driver entry points.
    Driver,
}

/// Correlation id handed to an API call or device operation.
///
/// `fresh` is set when the id was allocated for this call rather than inherited from
/// an enclosing one, i.e. when it is seen for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation {
    pub id: u64,
    pub fresh: bool,
}

impl Correlation {
    fn fresh(ids: &IdAllocator) -> Self {
        Self {
            id: ids.next(),
            fresh: true,
        }
    }

    fn inherited(id: u64) -> Self {
        Self { id, fresh: false }
    }
}

#[derive(Debug)]
struct Scope {
    id: u64,
    layer: ApiLayer,
    claimed: bool,
}

/// Intercepted calls currently on the thread's stack.
///
/// A driver call nested in a runtime call shares the runtime call's correlation id. A
/// device operation takes over the id of the innermost call once; any further operation
/// created by the same call gets a fresh id, so no two operations ever share one.
#[derive(Debug, Default)]
pub struct ApiScopes {
    scopes: Vec<Scope>,
}

impl ApiScopes {
    pub fn enter(&mut self, layer: ApiLayer, ids: &IdAllocator) -> Correlation {
        let inherited = match layer {
            ApiLayer::Driver => self
                .scopes
                .iter()
                .rev()
                .find(|scope| scope.layer == ApiLayer::Runtime)
                .map(|scope| scope.id),
            ApiLayer::Runtime => None,
        };
        let correlation = match inherited {
            Some(id) => Correlation::inherited(id),
            None => Correlation::fresh(ids),
        };
        self.scopes.push(Scope {
            id: correlation.id,
            layer,
            claimed: false,
        });
        correlation
    }

    /// Leaves the innermost scope with `id`. Returns `false` if no such scope exists.
    pub fn exit(&mut self, id: u64) -> bool {
        match self.scopes.iter().rposition(|scope| scope.id == id) {
            Some(position) => {
                self.scopes.remove(position);
                true
            }
            None => false,
        }
    }

    /// Correlation id for a new device operation.
    pub fn claim(&mut self, ids: &IdAllocator) -> Correlation {
        let Some(innermost) = self.scopes.last() else {
            return Correlation::fresh(ids);
        };
        if innermost.claimed {
            return Correlation::fresh(ids);
        }

        let id = innermost.id;
        for scope in self.scopes.iter_mut().filter(|scope| scope.id == id) {
            scope.claimed = true;
        }
        Correlation::inherited(id)
    }

    pub fn current(&self) -> Option<u64> {
        self.scopes.last().map(|scope| scope.id)
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}
