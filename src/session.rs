//! The `Session` data model: one PTY-attached child process plus its
//! bookkeeping.
//!
//! Output goes straight to whatever `onOutput` callbacks are currently
//! registered (see [`crate::fanout`]) rather than through a replay buffer —
//! there is no reconnect/replay requirement here.

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::serializer::WriteQueue;
use crate::variant::Variant;

/// Writes a buffer straight to the PTY master. Transport-race errors
/// (EBADF/EIO/ECONNRESET while the descriptor tears down) are non-fatal
/// — they're logged under the exact signature the noise filter
/// knows to drop, then swallowed rather than propagated.
pub(crate) async fn write_swallowing_races(writer: &mut tokio::fs::File, data: &[u8]) {
    use tokio::io::AsyncWriteExt;

    if let Err(e) = writer.write_all(data).await {
        let code = match e.raw_os_error() {
            Some(libc::EBADF) => "EBADF",
            Some(libc::EIO) => "EIO",
            Some(libc::ECONNRESET) => "ECONNRESET",
            _ => "OTHER",
        };
        tracing::warn!("Unhandled pty write error: code={code} ({e})");
        return;
    }
    let _ = writer.flush().await;
}

/// A point-in-time status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub running: bool,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

pub type OutputListener = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type ExitListener = Arc<dyn Fn(StatusSnapshot) + Send + Sync>;

/// A cancellation handle returned by `on_output`/`on_exit`. Dropping it does
/// nothing on its own — callers must pass it to
/// [`Session::remove_output_listener`] / [`Session::remove_exit_listener`] to
/// actually unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

struct Slot<T> {
    id: u64,
    listener: T,
}

/// One PTY-attached child process.
pub struct Session {
    pub id: String,
    pub variant: Variant,
    pub pid: u32,
    pub pgid: i32,
    /// Kept alive for the session lifetime purely for resize/ioctl access;
    /// reads and writes go through their own `dup`'d handles (below).
    pub master: OwnedFd,
    /// Async write handle onto a `dup`'d copy of the master fd.
    pub writer: Mutex<tokio::fs::File>,
    pub status: Mutex<StatusSnapshot>,
    /// Cheap non-blocking check for the write path, mirroring the
    /// registry's closing-set membership test without taking its lock.
    pub closing: AtomicBool,
    /// Populated only for variants whose writes go through the queued
    /// submit-sequence serializer (today: variant `A`).
    pub write_queue: Option<Arc<WriteQueue>>,
    pub submit_with_tab: AtomicBool,
    output_listeners: Mutex<Vec<Slot<OutputListener>>>,
    exit_listeners: Mutex<Vec<Slot<ExitListener>>>,
    next_listener_id: AtomicU64,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        variant: Variant,
        pid: u32,
        pgid: i32,
        master: OwnedFd,
        writer: tokio::fs::File,
        write_queue: Option<Arc<WriteQueue>>,
        submit_with_tab: bool,
    ) -> Self {
        Session {
            id,
            variant,
            pid,
            pgid,
            master,
            writer: Mutex::new(writer),
            status: Mutex::new(StatusSnapshot {
                running: true,
                pid: Some(pid),
                exit_code: None,
                signal: None,
            }),
            closing: AtomicBool::new(false),
            write_queue,
            submit_with_tab: AtomicBool::new(submit_with_tab),
            output_listeners: Mutex::new(Vec::new()),
            exit_listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        *self.status.lock().await
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub async fn on_output<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.output_listeners.lock().await.push(Slot {
            id,
            listener: Arc::new(listener),
        });
        ListenerHandle(id)
    }

    pub async fn on_exit<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(StatusSnapshot) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.exit_listeners.lock().await.push(Slot {
            id,
            listener: Arc::new(listener),
        });
        ListenerHandle(id)
    }

    pub async fn remove_output_listener(&self, handle: ListenerHandle) {
        self.output_listeners.lock().await.retain(|s| s.id != handle.0);
    }

    pub async fn remove_exit_listener(&self, handle: ListenerHandle) {
        self.exit_listeners.lock().await.retain(|s| s.id != handle.0);
    }

    /// Clear every output and exit listener. Idempotent — safe to call on an already-cleared session.
    pub async fn clear_listeners(&self) {
        self.output_listeners.lock().await.clear();
        self.exit_listeners.lock().await.clear();
    }

    pub(crate) async fn output_listener_snapshot(&self) -> Vec<OutputListener> {
        self.output_listeners
            .lock()
            .await
            .iter()
            .map(|s| Arc::clone(&s.listener))
            .collect()
    }

    pub(crate) async fn exit_listener_snapshot(&self) -> Vec<ExitListener> {
        self.exit_listeners
            .lock()
            .await
            .iter()
            .map(|s| Arc::clone(&s.listener))
            .collect()
    }
}
