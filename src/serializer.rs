//! Write Serializer: the two write regimes selected by session
//! variant.
//!
//! Non-`A` variants get a synchronous pass-through. Variant `A` enqueues
//! writes and drains them through a cooperative task that inserts the
//! synthetic submit sequence (TAB?/CR/LF) after each queued string's
//! first line, over a FIFO queue. The drainer is armed on the
//! empty-to-non-empty transition (a `compare_exchange` on `draining`
//! guards against two drainers for one session) and re-arms itself on the
//! pop-miss/queue-recheck race in `drain`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::session::{write_swallowing_races, Session};

const DELAY_AFTER_TEXT: Duration = Duration::from_millis(15);
const DELAY_AFTER_TAB: Duration = Duration::from_millis(20);
const DELAY_AFTER_CR: Duration = Duration::from_millis(25);

/// Per-session FIFO queue plus drainer coordination state, for variant `A`.
pub struct WriteQueue {
    queue: Mutex<VecDeque<String>>,
    draining: AtomicBool,
}

impl WriteQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(WriteQueue {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        })
    }
}

/// Write `data` for a non-`A` session: a synchronous pass-through, a silent
/// no-op if the session isn't running or is in the closing set.
pub async fn write_passthrough(session: &Session, data: &str) {
    if session.is_closing() {
        return;
    }
    if !session.status().await.running {
        return;
    }
    let mut writer = session.writer.lock().await;
    write_swallowing_races(&mut writer, data.as_bytes()).await;
}

/// Enqueue `data` for a variant-`A` session and arm the drainer if it isn't
/// already running.
pub async fn enqueue(session: &Arc<Session>, data: String) {
    let Some(wq) = session.write_queue.clone() else {
        return;
    };
    if session.is_closing() {
        return;
    }
    wq.queue.lock().await.push_back(data);

    if wq
        .draining
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        let session = Arc::clone(session);
        tokio::spawn(async move {
            drain(session).await;
        });
    }
}

async fn drain(session: Arc<Session>) {
    let Some(wq) = session.write_queue.clone() else {
        return;
    };

    loop {
        let next = wq.queue.lock().await.pop_front();
        let Some(item) = next else {
            wq.draining.store(false, Ordering::SeqCst);
            // Re-check for a race: something may have been enqueued between
            // the pop_front miss and clearing `draining`.
            if wq.queue.lock().await.is_empty() {
                return;
            }
            if wq
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            continue;
        };

        if session.is_closing() || !session.status().await.running {
            wq.queue.lock().await.clear();
            wq.draining.store(false, Ordering::SeqCst);
            return;
        }

        if !submit_one(&session, &item).await {
            wq.queue.lock().await.clear();
            wq.draining.store(false, Ordering::SeqCst);
            return;
        }
    }
}

/// Write `text`, then the synthetic submit sequence, recursively handling
/// any further lines in `text` after an embedded CR. Returns
/// `false` if a write failed and the drainer should abort.
async fn submit_one(session: &Session, text: &str) -> bool {
    let (prefix, rest) = match text.split_once('\r') {
        Some((before, after)) => (before, Some(after)),
        None => (text, None),
    };

    if session.is_closing() {
        return false;
    }

    {
        let mut writer = session.writer.lock().await;
        write_swallowing_races(&mut writer, prefix.as_bytes()).await;
    }
    tokio::time::sleep(DELAY_AFTER_TEXT).await;

    if session.submit_with_tab.load(Ordering::Relaxed) {
        let mut writer = session.writer.lock().await;
        write_swallowing_races(&mut writer, b"\t").await;
        drop(writer);
        tokio::time::sleep(DELAY_AFTER_TAB).await;
    }

    {
        let mut writer = session.writer.lock().await;
        write_swallowing_races(&mut writer, b"\r").await;
    }
    tokio::time::sleep(DELAY_AFTER_CR).await;

    // If the original text already had CRLF, don't emit a second LF.
    let already_had_lf = rest.is_some_and(|r| r.starts_with('\n'));
    if !already_had_lf {
        let mut writer = session.writer.lock().await;
        write_swallowing_races(&mut writer, b"\n").await;
    }

    if let Some(after) = rest {
        let after = after.strip_prefix('\n').unwrap_or(after);
        if !after.is_empty() {
            return Box::pin(submit_one(session, after)).await;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_queue_starts_empty_and_not_draining() {
        let wq = WriteQueue::new();
        assert!(!wq.draining.load(Ordering::SeqCst));
    }
}
