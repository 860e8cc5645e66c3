// Copyright 2024-2025 Irreducible Inc.

use std::sync::Arc;

use thiserror::Error;
use tracing::{level_filters::LevelFilter, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{
    filter::Filtered,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    Layer,
};

use crate::context::ViewContext;
use crate::correlation::ExternalKind;

use super::external_correlation::ExternalCorrelationLayer;

/// Environment variable holding the log filter directives, e.g. `gpu_view=debug`.
pub const LOG_ENV_VAR: &str = "GPU_VIEW_LOG";

trait WithEnvFilter<S: Subscriber>: Layer<S> + Sized {
    fn with_env_filter(self) -> Filtered<Self, EnvFilter, S> {
        let env_level_filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .with_env_var(LOG_ENV_VAR)
            .from_env_lossy();

        self.with_filter(env_level_filter)
    }
}

impl<S: Subscriber, T: Layer<S>> WithEnvFilter<S> for T {}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to initialize tracing: {0}")]
    TryInit(#[from] TryInitError),
}

/// Installs a global subscriber printing the crate's diagnostics to stderr, filtered by
/// `GPU_VIEW_LOG` (default `warn`).
pub fn init_tracing() -> Result<(), InitError> {
    let log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_env_filter();
    tracing_subscriber::registry().with(log).try_init()?;
    Ok(())
}

/// Like [`init_tracing`], and additionally turns the `external_id` field of application
/// spans into external correlation ids of `kind` on `context`.
///
/// The correlation layer sees every span; `GPU_VIEW_LOG` only filters the printed output.
pub fn init_tracing_with_context(
    context: Arc<ViewContext>,
    kind: ExternalKind,
) -> Result<(), InitError> {
    let log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_env_filter();
    tracing_subscriber::registry()
        .with(log)
        .with(ExternalCorrelationLayer::new(context, kind))
        .try_init()?;
    Ok(())
}
