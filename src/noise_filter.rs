//! Process-wide filter that drops a specific, expected noise pattern from
//! the trace/log stream: a PTY write failing with EBADF/EIO/ECONNRESET
//! while a session is closing or has already exited. Everything else passes
//! through unchanged.

use std::sync::Once;

use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

const SUPPRESSED_HEAD: &str = "Unhandled pty write error";
const SUPPRESSED_CODES: [&str; 3] = ["EBADF", "EIO", "ECONNRESET"];

/// A `tracing_subscriber::Layer` that swallows events matching the
/// suppressed signature instead of letting them reach downstream layers.
pub struct WriteErrorNoiseFilter;

impl<S> Layer<S> for WriteErrorNoiseFilter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn event_enabled(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) -> bool {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        !is_suppressed(&visitor.message)
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

fn is_suppressed(message: &str) -> bool {
    message.starts_with(SUPPRESSED_HEAD)
        && SUPPRESSED_CODES.iter().any(|code| message.contains(code))
}

static INSTALL: Once = Once::new();

/// Install the filter as part of the global tracing subscriber, using
/// `log_filter` as the `EnvFilter` directive (the caller resolves
/// `RUST_LOG` vs. config the same way the rest of startup does). Idempotent:
/// subsequent calls are no-ops.
pub fn install(log_filter: &str) {
    INSTALL.call_once(|| {
        use tracing_subscriber::prelude::*;

        let filter = tracing_subscriber::EnvFilter::try_new(log_filter)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(WriteErrorNoiseFilter)
            .with(tracing_subscriber::fmt::layer());

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            // Another subscriber is already installed (e.g. in tests); leave
            // it in place rather than panicking.
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_known_write_error_codes() {
        for code in SUPPRESSED_CODES {
            let msg = format!("Unhandled pty write error: {code}");
            assert!(is_suppressed(&msg), "expected {msg:?} to be suppressed");
        }
    }

    #[test]
    fn passes_through_unrelated_messages() {
        assert!(!is_suppressed("Unhandled pty write error: EPERM"));
        assert!(!is_suppressed("spawn failed"));
        assert!(!is_suppressed(""));
    }

    #[test]
    fn install_is_idempotent() {
        install("info");
        install("info");
    }
}
