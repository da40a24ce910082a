//! Session Registry: the map from session id to [`Session`], plus
//! creation, lookup, and dispose-all.
//!
//! Holds the write lock across the check-and-insert in `create_session` so
//! two concurrent requests for the same id can never both succeed.

use std::collections::{HashMap, HashSet};
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::directives::{self, CarryStore, ParseOutcome, RecentStore};
use crate::env_sanitizer::AuthMode;
use crate::error::SupervisorError;
use crate::fanout;
use crate::lifecycle::{self, CloseOptions, CloseResult, InterruptOptions};
use crate::serializer::{self, WriteQueue};
use crate::session::{ListenerHandle, Session, StatusSnapshot};
use crate::shell::pty::{allocate_pty, resize_pty, spawn_child, PtyPair};
use crate::variant::{ToolsTable, Variant};

/// Parameters for `create_session`.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionParams {
    /// Caller-supplied id. If absent, a fresh opaque token is generated.
    pub id: Option<String>,
    pub variant: Variant,
    /// Passed through unchanged; not interpreted by the core.
    pub profile_id: Option<String>,
    pub cwd: Option<String>,
    pub extra_args: Vec<String>,
    pub env: HashMap<String, String>,
    pub auth_mode: AuthMode,
}

pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    closing_set: Mutex<HashSet<String>>,
    tools: ToolsTable,
    supervisor_cwd: Option<String>,
    default_submit_with_tab: bool,
    dedupe_window: Duration,
    carry_cap_bytes: usize,
    directive_carry: Mutex<CarryStore>,
    directive_recent: Mutex<RecentStore>,
}

impl Registry {
    pub fn new(
        tools: ToolsTable,
        supervisor_cwd: Option<String>,
        default_submit_with_tab: bool,
        dedupe_window: Duration,
        carry_cap_bytes: usize,
    ) -> Self {
        Registry {
            sessions: RwLock::new(HashMap::new()),
            closing_set: Mutex::new(HashSet::new()),
            tools,
            supervisor_cwd,
            default_submit_with_tab,
            dedupe_window,
            carry_cap_bytes,
            directive_carry: Mutex::new(CarryStore::new()),
            directive_recent: Mutex::new(RecentStore::new()),
        }
    }

    /// `createSession`.
    pub async fn create_session(&self, params: CreateSessionParams) -> Result<String, SupervisorError> {
        let mut sessions = self.sessions.write().await;

        let id = params.id.clone().unwrap_or_else(generate_session_id);
        if sessions.contains_key(&id) {
            return Err(SupervisorError::SessionExists(id));
        }

        let tool = self
            .tools
            .get(&params.variant)
            .ok_or_else(|| SupervisorError::SpawnFailed(format!("no tool configured for variant {}", params.variant.as_str())))?;

        let mut args = tool.args.clone();
        args.extend(params.extra_args.iter().cloned());

        let parent_env: HashMap<String, String> = std::env::vars().collect();
        let env = params
            .variant
            .strategy()
            .scrub_env(&parent_env, &params.env, params.auth_mode);

        let working_dir = params
            .cwd
            .clone()
            .or_else(|| self.supervisor_cwd.clone())
            .or_else(|| std::env::current_dir().ok().map(|p| p.to_string_lossy().into_owned()))
            .unwrap_or_else(|| ".".to_string());

        let pty = allocate_pty().map_err(|e| SupervisorError::SpawnFailed(format!("allocate_pty: {e}")))?;

        let child = spawn_child(&pty, &tool.command, &args, &working_dir, &env)
            .map_err(|e| SupervisorError::SpawnFailed(format!("spawn_child: {e}")))?;

        let PtyPair { master, slave } = pty;
        drop(slave);

        let pid = child.id().unwrap_or(0);
        #[allow(clippy::cast_possible_wrap)]
        let pgid = pid as i32;

        let writer_fd = dup_raw(master.as_raw_fd())
            .map_err(|e| SupervisorError::SpawnFailed(format!("dup writer: {e}")))?;
        let reader_fd = dup_raw(master.as_raw_fd())
            .map_err(|e| SupervisorError::SpawnFailed(format!("dup reader: {e}")))?;

        // SAFETY: writer_fd/reader_fd are freshly dup'd, uniquely owned fds.
        let writer = tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(writer_fd) });
        let reader = tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(reader_fd) });

        let write_queue = if params.variant.uses_write_queue() {
            Some(WriteQueue::new())
        } else {
            None
        };

        let session = Arc::new(Session::new(
            id.clone(),
            params.variant,
            pid,
            pgid,
            master,
            writer,
            write_queue,
            self.default_submit_with_tab,
        ));

        sessions.insert(id.clone(), Arc::clone(&session));
        drop(sessions);

        spawn_reader_task(Arc::clone(&session), reader);
        spawn_exit_watcher(Arc::clone(&session), child);

        info!(
            session_id = %id,
            variant = params.variant.as_str(),
            pid,
            "session created"
        );

        Ok(id)
    }

    pub async fn get_status(&self, id: &str) -> Result<StatusSnapshot, SupervisorError> {
        let session = self.get(id).await?;
        Ok(session.status().await)
    }

    pub async fn on_output<F>(&self, id: &str, listener: F) -> Result<ListenerHandle, SupervisorError>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let session = self.get(id).await?;
        Ok(session.on_output(listener).await)
    }

    pub async fn on_exit<F>(&self, id: &str, listener: F) -> Result<ListenerHandle, SupervisorError>
    where
        F: Fn(StatusSnapshot) + Send + Sync + 'static,
    {
        let session = self.get(id).await?;
        Ok(session.on_exit(listener).await)
    }

    pub async fn remove_output_listener(&self, id: &str, handle: ListenerHandle) {
        if let Ok(session) = self.get(id).await {
            session.remove_output_listener(handle).await;
        }
    }

    pub async fn remove_exit_listener(&self, id: &str, handle: ListenerHandle) {
        if let Ok(session) = self.get(id).await {
            session.remove_exit_listener(handle).await;
        }
    }

    pub async fn write(&self, id: &str, data: &str) -> Result<(), SupervisorError> {
        let session = self.get(id).await?;
        if session.variant.uses_write_queue() {
            serializer::enqueue(&session, data.to_string()).await;
        } else {
            serializer::write_passthrough(&session, data).await;
        }
        Ok(())
    }

    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SupervisorError> {
        let session = self.get(id).await?;
        resize_pty(&session.master, cols, rows).map_err(|e| SupervisorError::SpawnFailed(format!("resize: {e}")))
    }

    pub async fn interrupt(&self, id: &str, opts: InterruptOptions) -> Result<(), SupervisorError> {
        let session = self.get(id).await?;
        lifecycle::interrupt(&session, opts).await;
        Ok(())
    }

    pub async fn stop(&self, id: &str) -> Result<(), SupervisorError> {
        let session = self.get(id).await?;
        lifecycle::stop(&session).await;
        Ok(())
    }

    pub async fn kill(&self, id: &str) -> Result<(), SupervisorError> {
        let session = self.get(id).await?;
        lifecycle::kill(&session);
        Ok(())
    }

    /// `close(id, {force?, graceMs?})`.
    pub async fn close(&self, id: &str, opts: CloseOptions) -> CloseResult {
        self.closing_set.lock().await.insert(id.to_string());

        let result = match self.sessions.read().await.get(id).cloned() {
            Some(session) => lifecycle::close(&session, opts).await,
            None => CloseResult {
                existed: false,
                was_running: false,
            },
        };

        self.sessions.write().await.remove(id);
        self.closing_set.lock().await.remove(id);
        self.directive_carry.lock().await.remove(id);
        self.directive_recent.lock().await.remove(id);

        result
    }

    /// `dispose()`: SIGKILL every session and clear all maps.
    pub async fn dispose(&self) {
        let mut sessions = self.sessions.write().await;
        for (id, session) in sessions.drain() {
            lifecycle::dispose_one(&session);
            info!(session_id = %id, "session disposed");
        }
        self.closing_set.lock().await.clear();
        self.directive_carry.lock().await.clear();
        self.directive_recent.lock().await.clear();
    }

    pub async fn list(&self) -> Vec<(String, StatusSnapshot)> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for (id, session) in sessions.iter() {
            out.push((id.clone(), session.status().await));
        }
        out
    }

    /// Feed a PTY output chunk through the directive parser for `id`,
    /// using the Registry's per-session carry/recent stores.
    pub async fn parse_directives(&self, id: &str, chunk: &[u8]) -> ParseOutcome {
        let mut carry = self.directive_carry.lock().await;
        let mut recent = self.directive_recent.lock().await;
        directives::parse_chunk_with_cap(id, chunk, &mut carry, &mut recent, self.dedupe_window, self.carry_cap_bytes)
    }

    async fn get(&self, id: &str) -> Result<Arc<Session>, SupervisorError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownSession(id.to_string()))
    }
}

fn generate_session_id() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    URL_SAFE_NO_PAD.encode(&bytes[..9])
}

fn dup_raw(fd: RawFd) -> std::io::Result<RawFd> {
    let dup = unsafe { libc::dup(fd) };
    if dup < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(dup)
    }
}

fn spawn_reader_task(session: Arc<Session>, mut reader: tokio::fs::File) {
    tokio::spawn(async move {
        use tokio::io::AsyncReadExt;

        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    fanout::dispatch_output(&session, &buf[..n]).await;
                }
            }
        }
    });
}

fn spawn_exit_watcher(session: Arc<Session>, mut child: tokio::process::Child) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                let code = status.code();
                #[cfg(unix)]
                let signal = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal()
                };
                #[cfg(not(unix))]
                let signal = None;
                lifecycle::observe_exit(&session, code, signal).await;
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "wait() on child failed");
                // `wait()` itself failed, so no real exit code or signal is
                // known. Use a sentinel exit code rather than leaving both
                // fields null — the first exit observation always fills at
                // least one.
                lifecycle::observe_exit(&session, Some(-1), None).await;
            }
        }
    });
}
