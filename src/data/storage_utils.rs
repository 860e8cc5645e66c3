// Copyright 2024-2025 Irreducible Inc.

use tracing::span;
use tracing_subscriber::registry::LookupSpan;

use crate::errors::err_msg;

/// Register storage of the given type with the span.
pub fn insert_to_span_storage<T, S>(
    id: &span::Id,
    ctx: tracing_subscriber::layer::Context<'_, S>,
    storage: T,
) where
    T: 'static + Send + Sync,
    S: tracing::Subscriber,
    for<'lookup> S: LookupSpan<'lookup>,
{
    let Some(span) = ctx.span(id) else {
        return err_msg!("failed to get span");
    };

    span.extensions_mut().replace(storage);
}

/// Copy of the span storage value, `None` if the span never got one.
pub fn span_storage<T, S>(id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) -> Option<T>
where
    T: 'static + Copy,
    S: tracing::Subscriber,
    for<'lookup> S: LookupSpan<'lookup>,
{
    let Some(span) = ctx.span(id) else {
        err_msg!("failed to get span");
        return None;
    };

    let extensions = span.extensions();
    extensions.get::<T>().copied()
}
