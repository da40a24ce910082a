//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::registry::Registry;

/// Capacity of the `session_events` broadcast channel (lagging subscribers
/// drop the oldest events rather than block producers).
const SESSION_EVENTS_CAPACITY: usize = 256;

/// Shared application state for the termsup server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// The Session Registry — owns every live PTY-backed session.
    pub registry: Arc<Registry>,
    /// Broadcast channel for session lifecycle and directive events
    /// (`session.created`, `session.exited`, `session.directive`).
    pub session_events: broadcast::Sender<Value>,
}

impl AppState {
    pub fn new(config: Config, registry: Registry) -> Self {
        let (session_events, _) = broadcast::channel(SESSION_EVENTS_CAPACITY);
        AppState {
            config: Arc::new(config),
            start_time: Instant::now(),
            registry: Arc::new(registry),
            session_events,
        }
    }
}
