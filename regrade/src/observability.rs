//! Logging setup and the spans shared by the worker and the evaluator.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Installs the global subscriber. `RUST_LOG` selects levels, `info` otherwise. Later calls do
/// nothing.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };

        // Another subscriber, e.g. a test harness, may already own the global default.
        if let Err(e) = result {
            eprintln!("logging was already initialized: {}", e);
        }
    });
}

#[must_use]
pub fn poll_span(queue: &str, batch_size: usize) -> Span {
    tracing::info_span!("poll", queue = queue, batch_size = batch_size)
}

#[must_use]
pub fn batch_span(batch: usize, columns: usize, cells: usize) -> Span {
    tracing::info_span!("batch", batch = batch, columns = columns, cells = cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn spans_can_be_entered() {
        let span = batch_span(0, 2, 10);
        let _guard = span.enter();
        tracing::info!("inside batch");
    }
}
