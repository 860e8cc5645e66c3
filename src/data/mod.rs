// Copyright 2024-2025 Irreducible Inc.

mod field_visitor;
mod storage_utils;

pub use field_visitor::ExternalIdVisitor;
pub use storage_utils::{insert_to_span_storage, span_storage};
