//! Observability infrastructure for tally services.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors used by the ingestion
//! daemon and the background freeze job.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name, defaulting to pretty for unknown values.
    #[must_use]
    pub fn from_env_value(value: &str) -> Self {
        match value {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `tally_ingest=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for message consumption with standard fields.
#[must_use]
pub fn consume_span(topic: &str, batch_size: usize) -> Span {
    tracing::info_span!("consume", topic = topic, batch_size = batch_size)
}

/// Creates a span for ledger write operations.
#[must_use]
pub fn ledger_span(operation: &str, rows: usize) -> Span {
    tracing::info_span!("ledger", op = operation, rows = rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn format_parses_from_env_value() {
        assert!(matches!(LogFormat::from_env_value("json"), LogFormat::Json));
        assert!(matches!(LogFormat::from_env_value(""), LogFormat::Pretty));
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = consume_span("settlement.payout", 10);
        let _guard = span.enter();
        tracing::info!("test message in span");
    }
}
