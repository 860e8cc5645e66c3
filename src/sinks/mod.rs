// Copyright 2024-2025 Irreducible Inc.

//! Ready-made [`EventSink`](crate::EventSink)s, added with
//! [`ViewHandler::add_subscriber`](crate::ViewHandler::add_subscriber).

pub mod csv;
mod log_tree;
pub mod summary;
