//! Lifecycle Controller: interrupt/stop/kill/close/forget/dispose,
//! implementing the Running → Closing → Exited → Forgotten state machine.
//!
//! The escalation path is a poll loop: send a soft signal, poll for exit on
//! a short cadence, and escalate to SIGKILL if the grace period expires.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::info;

use crate::fanout;
use crate::session::Session;

const INTERRUPT_SIGNAL_DELAY: Duration = Duration::from_millis(80);
const DEFAULT_GRACE_MS: u64 = 1400;
const MIN_GRACE_MS: u64 = 100;
const MAX_GRACE_MS: u64 = 10_000;
const EXIT_POLL_CADENCE: Duration = Duration::from_millis(40);
const POST_KILL_WAIT: Duration = Duration::from_millis(900);

/// The control-C byte (0x03) written to the PTY as the first line of defense
/// before the SIGINT fallback.
const CONTROL_C: u8 = 0x03;

#[derive(Debug, Clone, Copy, Default)]
pub struct InterruptOptions {
    /// Skip the PTY control-C byte and send SIGINT immediately.
    pub signal_only: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CloseOptions {
    /// Escalate to SIGKILL if the session is still running after `grace_ms`.
    /// Default `true`.
    pub force: bool,
    /// Grace period before escalating, clamped to [100, 10000] ms.
    pub grace_ms: u64,
}

impl Default for CloseOptions {
    fn default() -> Self {
        CloseOptions {
            force: true,
            grace_ms: DEFAULT_GRACE_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseResult {
    pub existed: bool,
    pub was_running: bool,
}

/// Send a signal to the child's pid, ignoring the result — this is a
/// best-effort nudge, not a fallible operation.
fn signal(pid: u32, sig: libc::c_int) {
    #[allow(clippy::cast_possible_wrap)]
    let pid = pid as libc::pid_t;
    unsafe {
        libc::kill(pid, sig);
    }
}

/// `interrupt(id, {signalOnly?})`.
pub async fn interrupt(session: &Session, opts: InterruptOptions) {
    if !session.status().await.running {
        return;
    }

    if !opts.signal_only {
        let mut writer = session.writer.lock().await;
        crate::session::write_swallowing_races(&mut writer, &[CONTROL_C]).await;
        drop(writer);
    }

    if opts.signal_only {
        signal(session.pid, libc::SIGINT);
    } else {
        let pid = session.pid;
        tokio::spawn(async move {
            tokio::time::sleep(INTERRUPT_SIGNAL_DELAY).await;
            signal(pid, libc::SIGINT);
        });
    }
}

/// `stop(id)`: no reliable cross-platform SIGTERM-through-PTY path is
/// assumed, so this is exactly `interrupt(id)`.
pub async fn stop(session: &Session) {
    interrupt(session, InterruptOptions::default()).await;
}

/// `kill(id)`: SIGKILL to the child pid, swallowing errors.
pub fn kill(session: &Session) {
    signal(session.pid, libc::SIGKILL);
}

/// Poll `session`'s status until it reports non-running or `deadline` passes.
/// Returns whether it was still running when the loop exited.
async fn poll_until_exited_or(session: &Session, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !session.status().await.running {
            return false;
        }
        if tokio::time::Instant::now() >= deadline {
            return true;
        }
        tokio::time::sleep(EXIT_POLL_CADENCE).await;
    }
}

/// `close(id, {force?, graceMs?})`. The caller is
/// responsible for registry-level bookkeeping (ClosingSet membership,
/// removal from the map); this function drives the signal/poll/kill
/// sequence and always calls `forget`.
pub async fn close(session: &Session, opts: CloseOptions) -> CloseResult {
    let grace_ms = opts.grace_ms.clamp(MIN_GRACE_MS, MAX_GRACE_MS);
    session.closing.store(true, Ordering::SeqCst);

    let was_running = session.status().await.running;

    if was_running {
        interrupt(session, InterruptOptions { signal_only: true }).await;
        let still_running = poll_until_exited_or(session, Duration::from_millis(grace_ms)).await;

        if still_running && opts.force {
            kill(session);
            poll_until_exited_or(session, POST_KILL_WAIT).await;
        }
    }

    forget(session).await;
    session.closing.store(false, Ordering::SeqCst);

    info!(session_id = %session.id, was_running, "session closed");

    CloseResult {
        existed: true,
        was_running,
    }
}

/// `forget(id)`: clear listener sets, attempt a final SIGKILL if the
/// session still looks alive, and let the caller drop the registry entry.
pub async fn forget(session: &Session) {
    session.clear_listeners().await;
    if session.status().await.running {
        kill(session);
    }
}

/// `dispose()`: SIGKILL every session handed in. Registry-level map
/// clearing is the caller's responsibility.
pub fn dispose_one(session: &Session) {
    kill(session);
}

/// Called by the exit-watcher task when the PTY reports the child has
/// exited. Mutates status, then fires exit listeners exactly once.
pub async fn observe_exit(session: &Session, exit_code: Option<i32>, signal: Option<i32>) {
    let snapshot = {
        let mut status = session.status.lock().await;
        if !status.running {
            return;
        }
        status.running = false;
        status.exit_code = exit_code;
        status.signal = signal;
        *status
    };
    info!(
        session_id = %session.id,
        exit_code = ?exit_code,
        signal = ?signal,
        "session exited"
    );
    fanout::fire_exit(session, snapshot).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_options_have_expected_defaults() {
        let opts = CloseOptions::default();
        assert!(opts.force);
        assert_eq!(opts.grace_ms, DEFAULT_GRACE_MS);
    }

    #[test]
    fn grace_ms_clamps_to_bounds() {
        assert_eq!(1u64.clamp(MIN_GRACE_MS, MAX_GRACE_MS), MIN_GRACE_MS);
        assert_eq!(999_999u64.clamp(MIN_GRACE_MS, MAX_GRACE_MS), MAX_GRACE_MS);
        assert_eq!(500u64.clamp(MIN_GRACE_MS, MAX_GRACE_MS), 500);
    }
}
