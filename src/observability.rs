//! Observability utilities.
//!
//! Logging is the only observability surface the pipeline carries itself;
//! metrics and tracing backends are the platform's concern. Each process
//! installs one subscriber tagged with its role, and the sidecar wraps
//! per-delivery work in a [`hop_span`] so every log line emitted while a
//! message is in flight carries the envelope id, the actor, and the route
//! position.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format, selected by `ASYA_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("ASYA_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Level filter precedence: `RUST_LOG`, then `ASYA_LOG_LEVEL`, then `info`.
fn level_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("ASYA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level.to_ascii_lowercase())
    })
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the process-wide subscriber, tagging startup with the process
/// role (`runtime`, `sidecar`, `gateway`). Later calls are no-ops, so
/// library consumers and tests may call it freely.
pub fn init_tracing(process: &str) {
    TRACING_INIT.get_or_init(|| {
        let registry = tracing_subscriber::registry().with(level_filter());
        let result = match LogFormat::from_env() {
            LogFormat::Json => registry
                .with(fmt::layer().json().flatten_event(true))
                .try_init(),
            LogFormat::Text => registry
                .with(fmt::layer().compact().with_target(false))
                .try_init(),
        };
        match result {
            Ok(()) => tracing::info!(process, "logging initialized"),
            Err(err) => eprintln!("tracing init skipped ({process}): {err}"),
        }
    });
}

/// Span covering one hop of one envelope.
///
/// The sidecar instruments each delivery with this span, so reconnect
/// attempts, publishes, and failure lines can be correlated to the envelope
/// without every call site repeating the fields.
pub fn hop_span(envelope_id: &str, actor: &str, index: usize) -> tracing::Span {
    tracing::info_span!("hop", envelope = %envelope_id, actor = %actor, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_noop() {
        init_tracing("runtime");
        init_tracing("sidecar");
    }

    #[test]
    fn format_defaults_to_text() {
        assert_eq!(LogFormat::from_env(), LogFormat::Text);
    }

    #[test]
    fn hop_span_accepts_envelope_context() {
        init_tracing("test");
        let span = hop_span("E1", "echo", 0);
        let _guard = span.enter();
        tracing::debug!("inside the hop span");
    }
}
