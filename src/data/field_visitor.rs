// Copyright 2024-2025 Irreducible Inc.

use tracing::field::{Field, Visit};

/// Name of the span field carrying an external correlation id.
pub const EXTERNAL_ID_FIELD: &str = "external_id";

/// Picks the external id out of span fields. Negative ids are ignored.
#[derive(Debug, Default)]
pub struct ExternalIdVisitor(pub Option<u64>);

impl Visit for ExternalIdVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == EXTERNAL_ID_FIELD {
            self.0 = Some(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == EXTERNAL_ID_FIELD {
            self.0 = u64::try_from(value).ok();
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == EXTERNAL_ID_FIELD {
            self.0 = value.parse().ok();
        }
    }

    fn record_debug(&mut self, _: &Field, _: &dyn std::fmt::Debug) {}
}
