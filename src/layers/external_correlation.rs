// Copyright 2024-2025 Irreducible Inc.

use std::sync::Arc;

use tracing::span;

use crate::context::ViewContext;
use crate::correlation::ExternalKind;
use crate::data::{insert_to_span_storage, span_storage, ExternalIdVisitor};

#[derive(Debug, Clone, Copy)]
struct SpanExternalId(u64);

/// ExternalCorrelationLayer
/// Makes application spans the external correlation context of the GPU work they issue.
///
/// A span with an `external_id` field pushes that id when entered and pops it when
/// exited, so every correlated record created inside gets an external correlation record
/// pointing at it.
///
/// ```
/// use std::sync::Arc;
/// use gpu_view::{ExternalCorrelationLayer, ExternalKind, ViewContext};
/// use tracing_subscriber::layer::SubscriberExt;
///
/// let context = Arc::new(ViewContext::new());
/// let subscriber = tracing_subscriber::registry()
///     .with(ExternalCorrelationLayer::new(context.clone(), ExternalKind::Custom0));
///
/// tracing::subscriber::with_default(subscriber, || {
///     let _scope = tracing::info_span!("frame", external_id = 42u64).entered();
///     assert_eq!(context.peek_external_correlation_id(ExternalKind::Custom0), Some(42));
/// });
/// ```
pub struct ExternalCorrelationLayer {
    context: Arc<ViewContext>,
    kind: ExternalKind,
}

impl ExternalCorrelationLayer {
    pub fn new(context: Arc<ViewContext>, kind: ExternalKind) -> Self {
        Self { context, kind }
    }
}

impl<S> tracing_subscriber::Layer<S> for ExternalCorrelationLayer
where
    S: tracing::Subscriber,
    S: for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        id: &span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = ExternalIdVisitor::default();
        attrs.record(&mut visitor);
        if let Some(external_id) = visitor.0 {
            insert_to_span_storage(id, ctx, SpanExternalId(external_id));
        }
    }

    fn on_record(
        &self,
        id: &span::Id,
        values: &span::Record<'_>,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = ExternalIdVisitor::default();
        values.record(&mut visitor);
        if let Some(external_id) = visitor.0 {
            insert_to_span_storage(id, ctx, SpanExternalId(external_id));
        }
    }

    fn on_enter(&self, id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let Some(SpanExternalId(external_id)) = span_storage(id, ctx) else {
            return;
        };
        if let Err(e) = self
            .context
            .push_external_correlation_id(self.kind, external_id)
        {
            tracing::warn!("failed to push external id {external_id}: {e}");
        }
    }

    fn on_exit(&self, id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let Some(SpanExternalId(external_id)) = span_storage(id, ctx) else {
            return;
        };
        match self.context.pop_external_correlation_id(self.kind) {
            Ok(popped) if popped == external_id => {}
            Ok(popped) => {
                tracing::debug!(expected = external_id, popped, "external ids popped out of order");
            }
            Err(e) => tracing::warn!("failed to pop external id {external_id}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::info_span;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    #[test]
    fn spans_push_and_pop_external_ids() {
        let context = Arc::new(ViewContext::new());
        let subscriber = tracing_subscriber::registry()
            .with(ExternalCorrelationLayer::new(context.clone(), ExternalKind::Custom1));

        tracing::subscriber::with_default(subscriber, || {
            let outer = info_span!("outer", external_id = 10u64);
            let plain = info_span!("plain");
            {
                let _outer = outer.enter();
                let _plain = plain.enter();
                let _inner = info_span!("inner", external_id = 20u64).entered();
                assert_eq!(context.peek_external_correlation_id(ExternalKind::Custom1), Some(20));
            }
            assert_eq!(context.peek_external_correlation_id(ExternalKind::Custom1), None);

            let late = info_span!("late", external_id = tracing::field::Empty);
            late.record("external_id", 30u64);
            let _late = late.enter();
            assert_eq!(context.peek_external_correlation_id(ExternalKind::Custom1), Some(30));
        });
    }

    #[test]
    fn other_kinds_are_untouched() {
        let context = Arc::new(ViewContext::new());
        let subscriber = tracing_subscriber::registry()
            .with(ExternalCorrelationLayer::new(context.clone(), ExternalKind::Custom0));

        tracing::subscriber::with_default(subscriber, || {
            let _span = info_span!("work", external_id = 5u64).entered();
            assert_eq!(context.peek_external_correlation_id(ExternalKind::Custom0), Some(5));
            assert_eq!(context.peek_external_correlation_id(ExternalKind::Custom1), None);
        });
    }
}
