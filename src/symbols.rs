// Copyright 2024-2025 Irreducible Inc.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::record::SymbolId;

#[derive(Default)]
struct Inner {
    ids: HashMap<Arc<str>, SymbolId>,
    names: Vec<Arc<str>>,
}

/// Interned kernel, API and file names referenced by records.
///
/// Records stay pointer-free; a [`SymbolId`] is resolved here for as long as the table lives.
#[derive(Default)]
pub struct SymbolTable {
    inner: RwLock<Inner>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, name: &str) -> SymbolId {
        if let Some(id) = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .ids
            .get(name)
        {
            return *id;
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = inner.ids.get(name) {
            return *id;
        }
        let name: Arc<str> = name.into();
        inner.names.push(name.clone());
        let id = SymbolId(inner.names.len() as u64);
        inner.ids.insert(name, id);
        id
    }

    pub fn resolve(&self, id: SymbolId) -> Option<Arc<str>> {
        if id.is_none() {
            return None;
        }
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .names
            .get(id.0 as usize - 1)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .names
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let symbols = SymbolTable::new();
        let a = symbols.intern("vector_add");
        let b = symbols.intern("matmul");
        assert_ne!(a, b);
        assert_eq!(symbols.intern("vector_add"), a);
        assert_eq!(symbols.resolve(b).as_deref(), Some("matmul"));
        assert_eq!(symbols.resolve(SymbolId::NONE), None);
        assert_eq!(symbols.resolve(SymbolId(99)), None);
        assert_eq!(symbols.len(), 2);
    }
}
