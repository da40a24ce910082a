//! Output Fan-out: delivers PTY output chunks to every registered
//! listener, and fires the one-shot exit event.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use tracing::warn;

use crate::session::{Session, StatusSnapshot};

/// Substring that flips `submitWithTab` to true for variant-`A` sessions the
/// first time it appears in output (case-insensitive).
const TAB_TO_QUEUE_HINT: &str = "tab to queue message";

/// Deliver one output chunk to every listener currently registered on
/// `session`. A panicking listener is caught and logged; it does not stop
/// delivery to the remaining listeners — the Rust-idiomatic reading of
/// "fan-out swallows listener exceptions" for a language with no catchable
/// exceptions.
pub async fn dispatch_output(session: &Session, chunk: &[u8]) {
    if session.variant.uses_write_queue() {
        maybe_flip_submit_with_tab(session, chunk);
    }

    for listener in session.output_listener_snapshot().await {
        let result = panic::catch_unwind(AssertUnwindSafe(|| listener(chunk)));
        if result.is_err() {
            warn!(session_id = %session.id, "output listener panicked");
        }
    }
}

fn maybe_flip_submit_with_tab(session: &Session, chunk: &[u8]) {
    if session.submit_with_tab.load(Ordering::Relaxed) {
        return;
    }
    let text = String::from_utf8_lossy(chunk);
    if text.to_lowercase().contains(TAB_TO_QUEUE_HINT) {
        session.submit_with_tab.store(true, Ordering::Relaxed);
    }
}

/// Fire the one-shot exit event: the caller must have already mutated
/// `session.status` to reflect the exit before calling this.
pub async fn fire_exit(session: &Session, snapshot: StatusSnapshot) {
    for listener in session.exit_listener_snapshot().await {
        let result = panic::catch_unwind(AssertUnwindSafe(|| listener(snapshot)));
        if result.is_err() {
            warn!(session_id = %session.id, "exit listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_matches_case_insensitively() {
        let text = "Press TAB To Queue Message for later";
        assert!(text.to_lowercase().contains(TAB_TO_QUEUE_HINT));
    }
}
